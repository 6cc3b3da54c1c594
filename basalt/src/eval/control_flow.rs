use basalt_base::code::{
    op::{Condition, ValueKind},
    InstructionIndex,
};

use crate::{
    bootstrap::{ILLEGAL_MONITOR_STATE_EXCEPTION, NULL_POINTER_EXCEPTION},
    class_instance::ClassInstance,
    GeneralError,
};

use super::{EvalError, RunInstArgs, RunInstValue};

fn branch(taken: bool, target: InstructionIndex) -> RunInstValue {
    if taken {
        RunInstValue::ContinueAt(target)
    } else {
        RunInstValue::Continue
    }
}

pub(super) fn if_zero(
    RunInstArgs { frame, .. }: RunInstArgs,
    cond: Condition,
    target: InstructionIndex,
) -> Result<RunInstValue, GeneralError> {
    let value = frame.stack.pop_int()?;
    Ok(branch(cond.test(value, 0), target))
}

pub(super) fn if_icmp(
    RunInstArgs { frame, .. }: RunInstArgs,
    cond: Condition,
    target: InstructionIndex,
) -> Result<RunInstValue, GeneralError> {
    let right = frame.stack.pop_int()?;
    let left = frame.stack.pop_int()?;
    Ok(branch(cond.test(left, right), target))
}

pub(super) fn if_acmp(
    RunInstArgs { frame, .. }: RunInstArgs,
    equal: bool,
    target: InstructionIndex,
) -> Result<RunInstValue, GeneralError> {
    let right = frame.stack.pop_reference()?;
    let left = frame.stack.pop_reference()?;
    Ok(branch((left == right) == equal, target))
}

pub(super) fn if_null(
    RunInstArgs { frame, .. }: RunInstArgs,
    is_null: bool,
    target: InstructionIndex,
) -> Result<RunInstValue, GeneralError> {
    let value = frame.stack.pop_reference()?;
    Ok(branch(value.is_none() == is_null, target))
}

pub(super) fn table_switch(
    RunInstArgs { frame, .. }: RunInstArgs,
    default: InstructionIndex,
    low: i32,
    targets: &[InstructionIndex],
) -> Result<RunInstValue, GeneralError> {
    let key = frame.stack.pop_int()?;
    // Computed in i64 so that `key - low` can't overflow
    let target = usize::try_from(i64::from(key) - i64::from(low))
        .ok()
        .and_then(|offset| targets.get(offset))
        .copied()
        .unwrap_or(default);
    Ok(RunInstValue::ContinueAt(target))
}

pub(super) fn lookup_switch(
    RunInstArgs { frame, .. }: RunInstArgs,
    default: InstructionIndex,
    pairs: &[(i32, InstructionIndex)],
) -> Result<RunInstValue, GeneralError> {
    let key = frame.stack.pop_int()?;
    // The pairs are sorted by key in the class file
    let target = pairs
        .binary_search_by_key(&key, |(k, _)| *k)
        .map_or(default, |i| pairs[i].1);
    Ok(RunInstValue::ContinueAt(target))
}

pub(super) fn return_value(
    RunInstArgs { frame, .. }: RunInstArgs,
    kind: Option<ValueKind>,
) -> Result<RunInstValue, GeneralError> {
    match kind {
        None => Ok(RunInstValue::ReturnVoid),
        // The verifier has checked that the value has the declared return type
        Some(_) => Ok(RunInstValue::Return(frame.stack.pop()?)),
    }
}

pub(super) fn athrow(mut args: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    let exc = match args.frame.stack.pop_reference()? {
        Some(exc) => exc,
        None => return args.throw(NULL_POINTER_EXCEPTION, Some("Cannot throw null")),
    };
    let exc = args
        .env
        .rt
        .gc
        .checked_as::<ClassInstance>(exc)
        .ok_or(EvalError::ExpectedThrowable)?;
    Ok(RunInstValue::Exception(exc))
}

pub(super) fn monitor_enter(mut args: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    let object = match args.frame.stack.pop_reference()? {
        Some(object) => object,
        None => {
            let message = "Cannot enter synchronized block";
            return args.throw(NULL_POINTER_EXCEPTION, Some(message));
        }
    };
    let monitor = args
        .env
        .rt
        .gc
        .monitor(object)
        .ok_or(EvalError::InvalidGcRef(object))?;
    monitor.enter(args.env.thread_id);
    Ok(RunInstValue::Continue)
}

pub(super) fn monitor_exit(mut args: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    let object = match args.frame.stack.pop_reference()? {
        Some(object) => object,
        None => {
            let message = "Cannot exit synchronized block";
            return args.throw(NULL_POINTER_EXCEPTION, Some(message));
        }
    };
    let monitor = args
        .env
        .rt
        .gc
        .monitor(object)
        .ok_or(EvalError::InvalidGcRef(object))?;
    if monitor.exit(args.env.thread_id) {
        Ok(RunInstValue::Continue)
    } else {
        args.throw(
            ILLEGAL_MONITOR_STATE_EXCEPTION,
            Some("current thread is not owner"),
        )
    }
}
