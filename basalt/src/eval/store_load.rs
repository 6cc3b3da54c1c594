//! Implementations for instructions which store/load data

use std::sync::Arc;

use basalt_base::{
    code::op::{ArrayKind, FieldAccess, StackOp},
    resolve::{ExpectedKind, ResolvedSymbol},
    util::format_field,
    LinkageError,
};
use basalt_classfile::{ConstantPoolEntry, ConstantPoolIndex};

use crate::{
    bootstrap::{
        ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION, NULL_POINTER_EXCEPTION,
    },
    class_instance::{ArrayInstance, ClassInstance},
    exc_value, initialize_class,
    rv::{RuntimeValue, RuntimeValuePrimitive},
    util::dotted_class_name,
    GeneralError,
};

use super::{EvalError, Frame, RunInstArgs, RunInstValue};

pub(super) fn ldc(
    mut args: RunInstArgs,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    let class = args.class;
    let pool = class
        .constant_pool()
        .ok_or(EvalError::MissingMethodClass(class.id()))?;

    let value: RuntimeValue = match pool.get(index)? {
        ConstantPoolEntry::Integer(v) => RuntimeValuePrimitive::I32(*v).into(),
        ConstantPoolEntry::Float(v) => RuntimeValuePrimitive::F32(*v).into(),
        ConstantPoolEntry::Long(v) => RuntimeValuePrimitive::I64(*v).into(),
        ConstantPoolEntry::Double(v) => RuntimeValuePrimitive::F64(*v).into(),
        ConstantPoolEntry::String { string_index } => {
            let text = pool.utf8(*string_index)?;
            args.env.intern_string(text)?.into()
        }
        _ => return Err(EvalError::UnexpectedConstant(index.0).into()),
    };

    args.frame.stack.push(value);
    Ok(RunInstValue::Continue)
}

// === Locals ===

pub(super) fn load(
    RunInstArgs { frame, .. }: RunInstArgs,
    index: u16,
) -> Result<RunInstValue, GeneralError> {
    let value = frame.locals.value_at(index)?;
    frame.stack.push(value);
    Ok(RunInstValue::Continue)
}

pub(super) fn store(
    RunInstArgs { frame, .. }: RunInstArgs,
    index: u16,
) -> Result<RunInstValue, GeneralError> {
    let value = frame.stack.pop()?;
    frame.locals.set_value_at(index, value);
    Ok(RunInstValue::Continue)
}

// === Arrays ===

fn out_of_bounds_message(index: i32, length: usize) -> String {
    format!("Index {} out of bounds for length {}", index, length)
}

pub(super) fn array_load(
    mut args: RunInstArgs,
    kind: ArrayKind,
) -> Result<RunInstValue, GeneralError> {
    let index = args.frame.stack.pop_int()?;
    let array = match args.frame.stack.pop_reference()? {
        Some(array) => array,
        None => {
            let message = format!("Cannot load from {} array", array_kind_name(kind));
            return args.throw(NULL_POINTER_EXCEPTION, Some(&message));
        }
    };

    let result = args
        .env
        .rt
        .gc
        .deref(array.unchecked_as::<ArrayInstance>(), |array| {
            usize::try_from(index)
                .ok()
                .and_then(|i| array.elements.get(i).copied())
                .ok_or(array.len())
        })
        .ok_or(EvalError::ExpectedArrayInstance)?;

    match result {
        Ok(value) => {
            args.frame.stack.push(value);
            Ok(RunInstValue::Continue)
        }
        Err(length) => args.throw(
            ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
            Some(&out_of_bounds_message(index, length)),
        ),
    }
}

pub(super) fn array_store(
    mut args: RunInstArgs,
    kind: ArrayKind,
) -> Result<RunInstValue, GeneralError> {
    let value = args.frame.stack.pop()?;
    let index = args.frame.stack.pop_int()?;
    let array = match args.frame.stack.pop_reference()? {
        Some(array) => array,
        None => {
            let message = format!("Cannot store to {} array", array_kind_name(kind));
            return args.throw(NULL_POINTER_EXCEPTION, Some(&message));
        }
    };

    let rt = Arc::clone(&args.env.rt);
    if let RuntimeValue::Reference(stored) = value {
        // The verifier only knows the static type of the array, so the element class is checked
        // against the actual component type here
        let array_class_id = rt
            .gc
            .class_of(array)
            .ok_or(EvalError::InvalidGcRef(array))?;
        let component_id = rt
            .classes
            .get(array_class_id)
            .and_then(|class| class.array().and_then(|array| array.component_id()))
            .ok_or(EvalError::ExpectedArrayInstance)?;
        let stored_class_id = rt
            .gc
            .class_of(stored)
            .ok_or(EvalError::InvalidGcRef(stored))?;
        if !rt.classes.is_assignable(stored_class_id, component_id) {
            let message = dotted_class_name(&rt, stored);
            return args.throw(ARRAY_STORE_EXCEPTION, Some(&message));
        }
    }

    let result = rt
        .gc
        .deref_mut(array.unchecked_as::<ArrayInstance>(), |array| {
            let length = array.len();
            let narrowed = value.narrow_to(&array.element_type);
            match usize::try_from(index)
                .ok()
                .and_then(|i| array.elements.get_mut(i))
            {
                Some(slot) => {
                    *slot = narrowed;
                    Ok(())
                }
                None => Err(length),
            }
        })
        .ok_or(EvalError::ExpectedArrayInstance)?;

    match result {
        Ok(()) => Ok(RunInstValue::Continue),
        Err(length) => args.throw(
            ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
            Some(&out_of_bounds_message(index, length)),
        ),
    }
}

fn array_kind_name(kind: ArrayKind) -> &'static str {
    match kind {
        ArrayKind::ByteOrBoolean => "byte/boolean",
        ArrayKind::Char => "char",
        ArrayKind::Short => "short",
        ArrayKind::Int => "int",
        ArrayKind::Long => "long",
        ArrayKind::Float => "float",
        ArrayKind::Double => "double",
        ArrayKind::Reference => "object",
    }
}

// === Fields ===

pub(super) fn field(
    mut args: RunInstArgs,
    access: FieldAccess,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    let rt = Arc::clone(&args.env.rt);
    let field_id = match rt.classes.resolve(args.class, index, ExpectedKind::Field) {
        Ok(ResolvedSymbol::Field(field_id)) => field_id,
        Ok(_) => return Err(EvalError::UnexpectedConstant(index.0).into()),
        Err(err) => return args.throw_linkage(&err),
    };

    let (declaring_id, field_index) = field_id.decompose();
    let declaring = rt
        .classes
        .get(declaring_id)
        .ok_or(GeneralError::MissingLoadedClass(declaring_id))?;
    let field = declaring
        .field(field_index)
        .ok_or_else(|| EvalError::MissingField(format!("{:?}", field_id)))?;
    let field_path = || format_field(declaring.name(), field.name(), field.descriptor());

    if field.is_static() != access.is_static() {
        let expected = if access.is_static() {
            "static"
        } else {
            "non-static"
        };
        return args.throw_linkage(&LinkageError::IncompatibleClassChange(format!(
            "Expected {} field {}",
            expected,
            field_path()
        )));
    }

    if access.is_static() {
        let statics = exc_value!(ret_inst: initialize_class(args.env, declaring_id)?);
        if access.is_put() {
            let value = args.frame.stack.pop()?.narrow_to(field.field_type());
            let was_set = rt
                .gc
                .deref_mut(statics, |statics| statics.fields.set(field_id, value))
                .ok_or(EvalError::InvalidGcRef(statics.into_generic()))?;
            if !was_set {
                return Err(EvalError::MissingField(field_path()).into());
            }
        } else {
            let value = rt
                .gc
                .deref(statics, |statics| statics.fields.get(field_id))
                .ok_or(EvalError::InvalidGcRef(statics.into_generic()))?
                .ok_or_else(|| EvalError::MissingField(field_path()))?;
            args.frame.stack.push(value);
        }
        return Ok(RunInstValue::Continue);
    }

    let value = if access.is_put() {
        Some(args.frame.stack.pop()?.narrow_to(field.field_type()))
    } else {
        None
    };
    let object = match args.frame.stack.pop_reference()? {
        Some(object) => object.unchecked_as::<ClassInstance>(),
        None => {
            let verb = if access.is_put() { "assign" } else { "read" };
            let message = format!("Cannot {} field \"{}\"", verb, field.name());
            return args.throw(NULL_POINTER_EXCEPTION, Some(&message));
        }
    };

    if let Some(value) = value {
        let was_set = rt
            .gc
            .deref_mut(object, |object| object.fields.set(field_id, value))
            .ok_or(EvalError::ExpectedClassInstance)?;
        if !was_set {
            return Err(EvalError::MissingField(field_path()).into());
        }
    } else {
        let value = rt
            .gc
            .deref(object, |object| object.fields.get(field_id))
            .ok_or(EvalError::ExpectedClassInstance)?
            .ok_or_else(|| EvalError::MissingField(field_path()))?;
        args.frame.stack.push(value);
    }

    Ok(RunInstValue::Continue)
}

// === Stack ===

fn pop_category_1(frame: &mut Frame) -> Result<RuntimeValue, EvalError> {
    let value = frame.stack.pop()?;
    if value.is_category_2() {
        return Err(EvalError::ExpectedStackValueCategory1);
    }
    Ok(value)
}

/// Push the values, the first being pushed first
fn push_all<const N: usize>(frame: &mut Frame, values: [RuntimeValue; N]) {
    for value in values {
        frame.stack.push(value);
    }
}

pub(super) fn stack_op(
    RunInstArgs { frame, .. }: RunInstArgs,
    op: StackOp,
) -> Result<RunInstValue, GeneralError> {
    apply_stack_op(frame, op)?;
    Ok(RunInstValue::Continue)
}

fn apply_stack_op(frame: &mut Frame, op: StackOp) -> Result<(), EvalError> {
    match op {
        StackOp::Pop => {
            pop_category_1(frame)?;
        }
        StackOp::Pop2 => {
            let top = frame.stack.pop()?;
            if !top.is_category_2() {
                pop_category_1(frame)?;
            }
        }
        StackOp::Dup => {
            let v1 = pop_category_1(frame)?;
            push_all(frame, [v1, v1]);
        }
        StackOp::DupX1 => {
            let v1 = pop_category_1(frame)?;
            let v2 = pop_category_1(frame)?;
            push_all(frame, [v1, v2, v1]);
        }
        StackOp::DupX2 => {
            let v1 = pop_category_1(frame)?;
            let v2 = frame.stack.pop()?;
            if v2.is_category_2() {
                push_all(frame, [v1, v2, v1]);
            } else {
                let v3 = pop_category_1(frame)?;
                push_all(frame, [v1, v3, v2, v1]);
            }
        }
        StackOp::Dup2 => {
            let v1 = frame.stack.pop()?;
            if v1.is_category_2() {
                push_all(frame, [v1, v1]);
            } else {
                let v2 = pop_category_1(frame)?;
                push_all(frame, [v2, v1, v2, v1]);
            }
        }
        StackOp::Dup2X1 => {
            let v1 = frame.stack.pop()?;
            if v1.is_category_2() {
                let v2 = pop_category_1(frame)?;
                push_all(frame, [v1, v2, v1]);
            } else {
                let v2 = pop_category_1(frame)?;
                let v3 = pop_category_1(frame)?;
                push_all(frame, [v2, v1, v3, v2, v1]);
            }
        }
        StackOp::Dup2X2 => {
            let v1 = frame.stack.pop()?;
            if v1.is_category_2() {
                let v2 = frame.stack.pop()?;
                if v2.is_category_2() {
                    push_all(frame, [v1, v2, v1]);
                } else {
                    let v3 = pop_category_1(frame)?;
                    push_all(frame, [v1, v3, v2, v1]);
                }
            } else {
                let v2 = pop_category_1(frame)?;
                let v3 = frame.stack.pop()?;
                if v3.is_category_2() {
                    push_all(frame, [v2, v1, v3, v2, v1]);
                } else {
                    let v4 = pop_category_1(frame)?;
                    push_all(frame, [v2, v1, v4, v3, v2, v1]);
                }
            }
        }
        StackOp::Swap => {
            let v1 = pop_category_1(frame)?;
            let v2 = pop_category_1(frame)?;
            push_all(frame, [v1, v2]);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use basalt_base::code::op::StackOp;

    use crate::{
        eval::Frame,
        rv::{RuntimeValue, RuntimeValuePrimitive},
    };

    fn int(v: i32) -> RuntimeValue {
        RuntimeValuePrimitive::I32(v).into()
    }

    fn long(v: i64) -> RuntimeValue {
        RuntimeValuePrimitive::I64(v).into()
    }

    fn apply(values: &[RuntimeValue], op: StackOp) -> Vec<RuntimeValue> {
        let mut frame = Frame::default();
        for value in values {
            frame.stack.push(*value);
        }
        super::apply_stack_op(&mut frame, op).unwrap();
        let mut result = Vec::new();
        while let Ok(value) = frame.stack.pop() {
            result.push(value);
        }
        result.reverse();
        result
    }

    #[test]
    fn test_dup_forms() {
        assert_eq!(apply(&[int(1), int(2)], StackOp::DupX1), [int(2), int(1), int(2)]);
        assert_eq!(
            apply(&[int(1), int(2), int(3)], StackOp::DupX2),
            [int(3), int(1), int(2), int(3)]
        );
        assert_eq!(apply(&[long(1)], StackOp::Dup2), [long(1), long(1)]);
        assert_eq!(
            apply(&[int(1), int(2)], StackOp::Dup2),
            [int(1), int(2), int(1), int(2)]
        );
        assert_eq!(
            apply(&[int(1), long(2)], StackOp::Dup2X1),
            [long(2), int(1), long(2)]
        );
        assert_eq!(
            apply(&[long(1), long(2)], StackOp::Dup2X2),
            [long(2), long(1), long(2)]
        );
        assert_eq!(
            apply(&[int(1), int(2), int(3), int(4)], StackOp::Dup2X2),
            [int(3), int(4), int(1), int(2), int(3), int(4)]
        );
        assert_eq!(apply(&[int(1), int(2)], StackOp::Swap), [int(2), int(1)]);
        assert_eq!(apply(&[int(1), long(2)], StackOp::Pop2), [int(1)]);
        assert_eq!(apply(&[int(1), int(2), int(3)], StackOp::Pop2), [int(1)]);
    }
}
