use std::sync::Arc;

use basalt_base::{util::to_dotted_name, STRING_NAME};
use basalt_classfile::{ConstantPoolIndex, FieldType};

use crate::{
    bootstrap::{CLASS_CAST_EXCEPTION, INSTANTIATION_ERROR, NULL_POINTER_EXCEPTION},
    class_instance::{ArrayInstance, ClassInstance, Instance, StringInstance},
    exc_value,
    gc::GcRef,
    initialize_class,
    rv::RuntimeValuePrimitive,
    util::{self, dotted_class_name, make_instance_fields},
    GeneralError,
};

use super::{EvalError, RunInstArgs, RunInstValue};

pub(super) fn new_instance(
    mut args: RunInstArgs,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    let rt = Arc::clone(&args.env.rt);
    let target = match rt.classes.resolve_class(args.class, index) {
        Ok(target) => target,
        Err(err) => return args.throw_linkage(&err),
    };

    if target.is_interface() || target.is_abstract() {
        let name = to_dotted_name(target.name());
        return args.throw(INSTANTIATION_ERROR, Some(&name));
    }

    exc_value!(ret_inst: initialize_class(args.env, target.id())?);

    // `new` only allocates, the constructor is invoked separately
    let object: GcRef<Instance> = if target.name() == STRING_NAME {
        rt.gc
            .alloc(StringInstance::new(target.id(), ""))
            .into_generic()
    } else {
        let fields = make_instance_fields(&rt.classes, &target);
        rt.gc
            .alloc(ClassInstance::new(target.id(), fields))
            .into_generic()
    };
    args.frame.stack.push(object);

    Ok(RunInstValue::Continue)
}

pub(super) fn new_array(
    mut args: RunInstArgs,
    element_type: &FieldType,
) -> Result<RunInstValue, GeneralError> {
    let length = args.frame.stack.pop_int()?;
    let array = exc_value!(ret_inst: util::new_array(args.env, element_type, length)?);
    args.frame.stack.push(array);
    Ok(RunInstValue::Continue)
}

/// `anewarray`, where the constant names the element class
pub(super) fn new_reference_array(
    mut args: RunInstArgs,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    let element = match args.env.rt.classes.resolve_class(args.class, index) {
        Ok(element) => element,
        Err(err) => return args.throw_linkage(&err),
    };
    let element_type = FieldType::from_class_name(element.name())
        .map_err(|_| EvalError::UnexpectedConstant(index.0))?;

    let length = args.frame.stack.pop_int()?;
    let array = exc_value!(ret_inst: util::new_array(args.env, &element_type, length)?);
    args.frame.stack.push(array);
    Ok(RunInstValue::Continue)
}

pub(super) fn array_length(mut args: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    let array = match args.frame.stack.pop_reference()? {
        Some(array) => array,
        None => {
            let message = "Cannot read the array length because value is null";
            return args.throw(NULL_POINTER_EXCEPTION, Some(message));
        }
    };

    let length = args
        .env
        .rt
        .gc
        .deref(array.unchecked_as::<ArrayInstance>(), ArrayInstance::len)
        .ok_or(EvalError::ExpectedArrayInstance)?;
    // Lengths come from an i32 so they always fit
    let length = i32::try_from(length).unwrap_or(i32::MAX);
    args.frame.stack.push(RuntimeValuePrimitive::I32(length));
    Ok(RunInstValue::Continue)
}

/// Whether the object is an instance of the class named by the constant.
/// `Ok(Err(..))` holds the exception resolving the class threw.
fn is_instance(
    args: &mut RunInstArgs,
    object: GcRef<Instance>,
    index: ConstantPoolIndex,
) -> Result<Result<(bool, String), GcRef<ClassInstance>>, GeneralError> {
    let rt = Arc::clone(&args.env.rt);
    let target = match rt.classes.resolve_class(args.class, index) {
        Ok(target) => target,
        Err(err) => return Ok(Err(args.env.throw_linkage(&err)?)),
    };
    let object_class = rt
        .gc
        .class_of(object)
        .ok_or(EvalError::InvalidGcRef(object))?;
    Ok(Ok((
        rt.classes.is_assignable(object_class, target.id()),
        to_dotted_name(target.name()),
    )))
}

pub(super) fn check_cast(
    mut args: RunInstArgs,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    // The reference stays on the stack
    let object = match args.frame.stack.peek().copied() {
        Some(value) => value
            .into_reference()
            .ok_or(EvalError::ExpectedStackValueReference)?,
        None => return Err(EvalError::ExpectedStackValue.into()),
    };
    // Null can be cast to anything
    let object = match object {
        Some(object) => object,
        None => return Ok(RunInstValue::Continue),
    };

    match is_instance(&mut args, object, index)? {
        Ok((true, _)) => Ok(RunInstValue::Continue),
        Ok((false, target_name)) => {
            let message = format!(
                "class {} cannot be cast to class {}",
                dotted_class_name(&args.env.rt, object),
                target_name
            );
            args.throw(CLASS_CAST_EXCEPTION, Some(&message))
        }
        Err(exc) => Ok(RunInstValue::Exception(exc)),
    }
}

pub(super) fn instance_of(
    mut args: RunInstArgs,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    let object = match args.frame.stack.pop_reference()? {
        Some(object) => object,
        None => {
            args.frame.stack.push(RuntimeValuePrimitive::I32(0));
            return Ok(RunInstValue::Continue);
        }
    };

    match is_instance(&mut args, object, index)? {
        Ok((is_instance, _)) => {
            args.frame
                .stack
                .push(RuntimeValuePrimitive::I32(i32::from(is_instance)));
            Ok(RunInstValue::Continue)
        }
        Err(exc) => Ok(RunInstValue::Exception(exc)),
    }
}
