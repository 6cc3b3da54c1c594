//! Arithmetic, conversions and comparisons.
//! Integer arithmetic wraps, and only integer division or remainder by zero throws.

use basalt_base::code::op::{ArithOp, CompareOp, Conversion, NumKind};

use crate::{
    bootstrap::ARITHMETIC_EXCEPTION,
    rv::{RuntimeValue, RuntimeValuePrimitive},
    GeneralError,
};

use super::{EvalError, RunInstArgs, RunInstValue};

pub(super) fn iinc(
    RunInstArgs { frame, .. }: RunInstArgs,
    index: u16,
    delta: i16,
) -> Result<RunInstValue, GeneralError> {
    let value = frame
        .locals
        .value_at(index)?
        .into_int()
        .ok_or(EvalError::ExpectedLocalVariableIntRepr(index))?;
    let value = value.wrapping_add(i32::from(delta));
    frame
        .locals
        .set_value_at(index, RuntimeValuePrimitive::I32(value).into());
    Ok(RunInstValue::Continue)
}

pub(super) fn arith(
    mut args: RunInstArgs,
    kind: NumKind,
    op: ArithOp,
) -> Result<RunInstValue, GeneralError> {
    let stack = &mut args.frame.stack;
    let result: Option<RuntimeValue> = match kind {
        NumKind::Int => {
            if op == ArithOp::Neg {
                let v = stack.pop_int()?;
                Some(RuntimeValuePrimitive::I32(v.wrapping_neg()).into())
            } else {
                let right = stack.pop_int()?;
                let left = stack.pop_int()?;
                int_op(op, left, right).map(|v| RuntimeValuePrimitive::I32(v).into())
            }
        }
        NumKind::Long => {
            if op == ArithOp::Neg {
                let v = stack.pop_long()?;
                Some(RuntimeValuePrimitive::I64(v.wrapping_neg()).into())
            } else if op.is_shift() {
                // The shift amount is always an int
                let right = stack.pop_int()?;
                let left = stack.pop_long()?;
                long_op(op, left, i64::from(right)).map(|v| RuntimeValuePrimitive::I64(v).into())
            } else {
                let right = stack.pop_long()?;
                let left = stack.pop_long()?;
                long_op(op, left, right).map(|v| RuntimeValuePrimitive::I64(v).into())
            }
        }
        NumKind::Float => {
            if op == ArithOp::Neg {
                let v = stack.pop_float()?;
                Some(RuntimeValuePrimitive::F32(-v).into())
            } else {
                let right = stack.pop_float()?;
                let left = stack.pop_float()?;
                Some(RuntimeValuePrimitive::F32(float_op(op, left, right)?).into())
            }
        }
        NumKind::Double => {
            if op == ArithOp::Neg {
                let v = stack.pop_double()?;
                Some(RuntimeValuePrimitive::F64(-v).into())
            } else {
                let right = stack.pop_double()?;
                let left = stack.pop_double()?;
                Some(RuntimeValuePrimitive::F64(double_op(op, left, right)?).into())
            }
        }
    };

    match result {
        Some(result) => {
            args.frame.stack.push(result);
            Ok(RunInstValue::Continue)
        }
        None => args.throw(ARITHMETIC_EXCEPTION, Some("/ by zero")),
    }
}

/// `None` on division by zero
fn int_op(op: ArithOp, left: i32, right: i32) -> Option<i32> {
    // Shift amounts are masked, so the casts can't lose anything
    #[allow(clippy::cast_sign_loss)]
    let shift = (right & 0x1f) as u32;
    Some(match op {
        ArithOp::Add => left.wrapping_add(right),
        ArithOp::Sub => left.wrapping_sub(right),
        ArithOp::Mul => left.wrapping_mul(right),
        ArithOp::Div => left.checked_div(right).or_else(|| {
            // i32::MIN / -1 overflows to itself
            (right == -1).then(|| left.wrapping_neg())
        })?,
        ArithOp::Rem => left
            .checked_rem(right)
            .or_else(|| (right == -1).then(|| 0))?,
        ArithOp::Neg => left.wrapping_neg(),
        ArithOp::Shl => left.wrapping_shl(shift),
        ArithOp::Shr => left.wrapping_shr(shift),
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        ArithOp::UShr => ((left as u32) >> shift) as i32,
        ArithOp::And => left & right,
        ArithOp::Or => left | right,
        ArithOp::Xor => left ^ right,
    })
}

/// `None` on division by zero
fn long_op(op: ArithOp, left: i64, right: i64) -> Option<i64> {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let shift = (right & 0x3f) as u32;
    Some(match op {
        ArithOp::Add => left.wrapping_add(right),
        ArithOp::Sub => left.wrapping_sub(right),
        ArithOp::Mul => left.wrapping_mul(right),
        ArithOp::Div => left
            .checked_div(right)
            .or_else(|| (right == -1).then(|| left.wrapping_neg()))?,
        ArithOp::Rem => left
            .checked_rem(right)
            .or_else(|| (right == -1).then(|| 0))?,
        ArithOp::Neg => left.wrapping_neg(),
        ArithOp::Shl => left.wrapping_shl(shift),
        ArithOp::Shr => left.wrapping_shr(shift),
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        ArithOp::UShr => ((left as u64) >> shift) as i64,
        ArithOp::And => left & right,
        ArithOp::Or => left | right,
        ArithOp::Xor => left ^ right,
    })
}

fn float_op(op: ArithOp, left: f32, right: f32) -> Result<f32, EvalError> {
    Ok(match op {
        ArithOp::Add => left + right,
        ArithOp::Sub => left - right,
        ArithOp::Mul => left * right,
        ArithOp::Div => left / right,
        // Rust's remainder truncates like java's fmod-style `%`
        ArithOp::Rem => left % right,
        ArithOp::Neg => -left,
        _ => return Err(EvalError::UnsupportedInstruction("float bitwise operation")),
    })
}

fn double_op(op: ArithOp, left: f64, right: f64) -> Result<f64, EvalError> {
    Ok(match op {
        ArithOp::Add => left + right,
        ArithOp::Sub => left - right,
        ArithOp::Mul => left * right,
        ArithOp::Div => left / right,
        ArithOp::Rem => left % right,
        ArithOp::Neg => -left,
        _ => return Err(EvalError::UnsupportedInstruction("double bitwise operation")),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(super) fn convert(
    RunInstArgs { frame, .. }: RunInstArgs,
    conversion: Conversion,
) -> Result<RunInstValue, GeneralError> {
    let stack = &mut frame.stack;
    // `as` from floats saturates and maps NaN to zero, as java does
    let value: RuntimeValuePrimitive = match conversion {
        Conversion::I2L => RuntimeValuePrimitive::I64(i64::from(stack.pop_int()?)),
        Conversion::I2F => RuntimeValuePrimitive::F32(stack.pop_int()? as f32),
        Conversion::I2D => RuntimeValuePrimitive::F64(f64::from(stack.pop_int()?)),
        Conversion::L2I => RuntimeValuePrimitive::I32(stack.pop_long()? as i32),
        Conversion::L2F => RuntimeValuePrimitive::F32(stack.pop_long()? as f32),
        Conversion::L2D => RuntimeValuePrimitive::F64(stack.pop_long()? as f64),
        Conversion::F2I => RuntimeValuePrimitive::I32(stack.pop_float()? as i32),
        Conversion::F2L => RuntimeValuePrimitive::I64(stack.pop_float()? as i64),
        Conversion::F2D => RuntimeValuePrimitive::F64(f64::from(stack.pop_float()?)),
        Conversion::D2I => RuntimeValuePrimitive::I32(stack.pop_double()? as i32),
        Conversion::D2L => RuntimeValuePrimitive::I64(stack.pop_double()? as i64),
        Conversion::D2F => RuntimeValuePrimitive::F32(stack.pop_double()? as f32),
        Conversion::I2B => RuntimeValuePrimitive::I32(i32::from(stack.pop_int()? as i8)),
        #[allow(clippy::cast_sign_loss)]
        Conversion::I2C => RuntimeValuePrimitive::I32(i32::from(stack.pop_int()? as u16)),
        Conversion::I2S => RuntimeValuePrimitive::I32(i32::from(stack.pop_int()? as i16)),
    };
    stack.push(value);
    Ok(RunInstValue::Continue)
}

pub(super) fn compare(
    RunInstArgs { frame, .. }: RunInstArgs,
    op: CompareOp,
) -> Result<RunInstValue, GeneralError> {
    let stack = &mut frame.stack;
    let result = match op {
        CompareOp::LCmp => {
            let right = stack.pop_long()?;
            let left = stack.pop_long()?;
            ordering_value(left.partial_cmp(&right), -1)
        }
        CompareOp::FCmpL | CompareOp::FCmpG => {
            let right = stack.pop_float()?;
            let left = stack.pop_float()?;
            ordering_value(left.partial_cmp(&right), nan_result(op))
        }
        CompareOp::DCmpL | CompareOp::DCmpG => {
            let right = stack.pop_double()?;
            let left = stack.pop_double()?;
            ordering_value(left.partial_cmp(&right), nan_result(op))
        }
    };
    stack.push(RuntimeValuePrimitive::I32(result));
    Ok(RunInstValue::Continue)
}

/// The `l` variants push -1 when either operand is NaN, the `g` variants push 1
fn nan_result(op: CompareOp) -> i32 {
    match op {
        CompareOp::FCmpG | CompareOp::DCmpG => 1,
        _ => -1,
    }
}

fn ordering_value(ordering: Option<std::cmp::Ordering>, unordered: i32) -> i32 {
    match ordering {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
        None => unordered,
    }
}

#[cfg(test)]
mod tests {
    use basalt_base::code::op::{ArithOp, CompareOp};

    use super::{int_op, long_op, nan_result, ordering_value};

    #[test]
    fn test_int_edge_cases() {
        assert_eq!(int_op(ArithOp::Div, 7, 0), None);
        assert_eq!(int_op(ArithOp::Rem, 7, 0), None);
        assert_eq!(int_op(ArithOp::Div, i32::MIN, -1), Some(i32::MIN));
        assert_eq!(int_op(ArithOp::Rem, i32::MIN, -1), Some(0));
        assert_eq!(int_op(ArithOp::Div, -7, 2), Some(-3));
        assert_eq!(int_op(ArithOp::Rem, -7, 2), Some(-1));
        assert_eq!(int_op(ArithOp::Add, i32::MAX, 1), Some(i32::MIN));
        // Shift amounts only use their low five bits
        assert_eq!(int_op(ArithOp::Shl, 1, 33), Some(2));
        assert_eq!(int_op(ArithOp::UShr, -1, 28), Some(0xF));
        assert_eq!(int_op(ArithOp::Shr, -16, 2), Some(-4));
    }

    #[test]
    fn test_long_edge_cases() {
        assert_eq!(long_op(ArithOp::Div, 1, 0), None);
        assert_eq!(long_op(ArithOp::Div, i64::MIN, -1), Some(i64::MIN));
        assert_eq!(long_op(ArithOp::Shl, 1, 65), Some(2));
        assert_eq!(long_op(ArithOp::UShr, -1, 60), Some(0xF));
    }

    #[test]
    fn test_nan_comparison() {
        let nan = f32::NAN;
        assert_eq!(
            ordering_value(nan.partial_cmp(&1.0), nan_result(CompareOp::FCmpL)),
            -1
        );
        assert_eq!(
            ordering_value(nan.partial_cmp(&1.0), nan_result(CompareOp::FCmpG)),
            1
        );
        assert_eq!(
            ordering_value(2.0_f64.partial_cmp(&1.0), nan_result(CompareOp::DCmpL)),
            1
        );
    }
}
