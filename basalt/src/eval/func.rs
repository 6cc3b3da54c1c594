//! The four invoke instructions.
//! Resolution picks the method named by the constant pool, and selection then picks the method
//! that actually runs for the receiver.

use std::sync::Arc;

use basalt_base::{
    class::{Class, Method},
    code::op::InvokeKind,
    default_methods::MethodSignature,
    id::{ClassId, MethodId},
    resolve::{ExpectedKind, ResolvedSymbol},
    util::{format_method, to_dotted_name},
    LinkageError,
};
use basalt_classfile::{ConstantPoolIndex, MethodAccessFlags};
use smallvec::SmallVec;

use crate::{
    bootstrap::NULL_POINTER_EXCEPTION,
    class_instance::Instance,
    eval::{eval_method, EvalError, EvalMethodValue, Frame, Locals},
    exc_value,
    gc::GcRef,
    initialize_class,
    rv::RuntimeValue,
    GeneralError, Runtime,
};

use super::{RunInstArgs, RunInstValue};

pub(super) fn invoke(
    mut args: RunInstArgs,
    kind: InvokeKind,
    index: ConstantPoolIndex,
) -> Result<RunInstValue, GeneralError> {
    let rt = Arc::clone(&args.env.rt);

    let expected = match kind {
        InvokeKind::Virtual => ExpectedKind::Method,
        InvokeKind::Interface => ExpectedKind::InterfaceMethod,
        InvokeKind::Static | InvokeKind::Special => ExpectedKind::AnyMethod,
    };
    let resolved_id = match rt.classes.resolve(args.class, index, expected) {
        Ok(ResolvedSymbol::Method(method_id)) => method_id,
        Ok(_) => return Err(EvalError::UnexpectedConstant(index.0).into()),
        Err(err) => return args.throw_linkage(&err),
    };

    let (resolved_class_id, resolved_index) = resolved_id.decompose();
    let resolved_class = rt
        .classes
        .get(resolved_class_id)
        .ok_or(GeneralError::MissingLoadedClass(resolved_class_id))?;
    let resolved = resolved_class
        .method(resolved_index)
        .ok_or(GeneralError::MissingLoadedMethod(resolved_id))?;

    let is_static_invoke = kind == InvokeKind::Static;
    if resolved.is_static() != is_static_invoke {
        let expected = if is_static_invoke {
            "static"
        } else {
            "non-static"
        };
        return args.throw_linkage(&LinkageError::IncompatibleClassChange(format!(
            "Expecting {} method {}",
            expected,
            format_method(resolved_class.name(), resolved.name(), resolved.descriptor())
        )));
    }

    // The class named by the instruction, which may be a subclass or subinterface of the class
    // declaring the resolved method
    let symbolic = {
        let class = args.class;
        let pool = class
            .constant_pool()
            .ok_or(EvalError::MissingMethodClass(class.id()))?;
        let (member, _) = pool.any_method_ref(index)?;
        match rt.classes.get_or_load(member.class_name) {
            Ok(symbolic) => symbolic,
            Err(err) => return args.throw_linkage(&err),
        }
    };

    // Arguments are popped in reverse
    let param_count = resolved.parsed_descriptor().parameters.len();
    let mut params: SmallVec<[RuntimeValue; 8]> = SmallVec::with_capacity(param_count);
    for _ in 0..param_count {
        params.push(args.frame.stack.pop()?);
    }
    params.reverse();

    if is_static_invoke {
        exc_value!(ret_inst: initialize_class(args.env, resolved_class_id)?);
        let frame = make_frame(None, &params);
        return call(args, resolved_id, frame);
    }

    let receiver = match args.frame.stack.pop_reference()? {
        Some(receiver) => receiver,
        None => {
            let message = format!(
                "Cannot invoke \"{}.{}()\" because value is null",
                to_dotted_name(symbolic.name()),
                resolved.name()
            );
            return args.throw(NULL_POINTER_EXCEPTION, Some(&message));
        }
    };

    let selected = match kind {
        InvokeKind::Special => select_special(&rt, args.class, &symbolic, resolved_id, resolved),
        InvokeKind::Virtual | InvokeKind::Interface => {
            let receiver_class_id = rt
                .gc
                .class_of(receiver)
                .ok_or(EvalError::InvalidGcRef(receiver))?;
            if kind == InvokeKind::Interface
                && !rt.classes.is_assignable(receiver_class_id, symbolic.id())
            {
                Err(LinkageError::IncompatibleClassChange(format!(
                    "Class {} does not implement the requested interface {}",
                    to_dotted_name(&rt.classes.names().tpath(receiver_class_id)),
                    to_dotted_name(symbolic.name())
                )))
            } else {
                select_virtual(&args, receiver_class_id, resolved_id, resolved)
                    .and_then(|target| check_interface_target(&rt, kind, target))
            }
        }
        InvokeKind::Static => Ok(resolved_id),
    };
    let target = match selected {
        Ok(target) => target,
        Err(err) => return args.throw_linkage(&err),
    };

    let frame = make_frame(Some(receiver), &params);
    call(args, target, frame)
}

fn make_frame(receiver: Option<GcRef<Instance>>, params: &[RuntimeValue]) -> Frame {
    let mut locals = Locals::default();
    if let Some(receiver) = receiver {
        locals.push_transform(RuntimeValue::Reference(receiver));
    }
    for param in params {
        locals.push_transform(*param);
    }
    Frame::new_locals(locals)
}

fn call(
    mut args: RunInstArgs,
    target: MethodId,
    frame: Frame,
) -> Result<RunInstValue, GeneralError> {
    match eval_method(args.env, target, frame)? {
        EvalMethodValue::ReturnVoid => Ok(RunInstValue::Continue),
        EvalMethodValue::Return(value) => {
            args.frame.stack.push(value);
            Ok(RunInstValue::Continue)
        }
        EvalMethodValue::Exception(exc) => Ok(RunInstValue::Exception(exc)),
    }
}

/// Select the method for `invokespecial`.
/// Constructors and private methods are invoked directly. `I.super.m()` selects from the
/// interface `I`, and calls to a superclass method select from the direct superclass of the
/// current class, so that an override between the two is found.
fn select_special(
    rt: &Runtime,
    current: &Arc<Class>,
    symbolic: &Arc<Class>,
    resolved_id: MethodId,
    resolved: &Method,
) -> Result<MethodId, LinkageError> {
    if resolved.is_init() || resolved.is_private() {
        return Ok(resolved_id);
    }

    let signature = MethodSignature::new(resolved.name(), resolved.descriptor());
    if symbolic.is_interface() {
        return rt.classes.select_invocable(symbolic, &signature);
    }

    if symbolic.id() != current.id() && rt.classes.is_same_or_subclass(current.id(), symbolic.id())
    {
        let super_id = current
            .super_id()
            .ok_or_else(|| LinkageError::NoClassDefFound(current.name().to_owned()))?;
        let super_class = rt.classes.get_or_load_id(super_id)?;
        return rt.classes.select_invocable(&super_class, &signature);
    }

    Ok(resolved_id)
}

/// Select the method for `invokevirtual` and `invokeinterface`, going through the call site
/// cache and then the receiver's method table, before falling back to the default methods of
/// its interfaces
fn select_virtual(
    args: &RunInstArgs,
    receiver_class_id: ClassId,
    resolved_id: MethodId,
    resolved: &Method,
) -> Result<MethodId, LinkageError> {
    if resolved.is_private() {
        return Ok(resolved_id);
    }

    let rt = &args.env.rt;
    if let Some(target) = rt
        .call_sites
        .get(args.method_id, args.inst_index, receiver_class_id)
    {
        return Ok(target);
    }

    let signature = MethodSignature::new(resolved.name(), resolved.descriptor());
    let from_table = rt
        .method_table(receiver_class_id)
        .and_then(|table| table.get(&signature));
    let target = match from_table {
        Some(target) => target,
        None => {
            let receiver_class = rt.classes.get_or_load_id(receiver_class_id)?;
            rt.classes.select_invocable(&receiver_class, &signature)?
        }
    };

    rt.call_sites
        .set(args.method_id, args.inst_index, receiver_class_id, target);
    Ok(target)
}

/// Methods selected through `invokeinterface` must be public
fn check_interface_target(
    rt: &Runtime,
    kind: InvokeKind,
    target: MethodId,
) -> Result<MethodId, LinkageError> {
    if kind != InvokeKind::Interface {
        return Ok(target);
    }

    let is_public = rt
        .classes
        .with_method(target, |_, method| {
            method.access_flags().contains(MethodAccessFlags::PUBLIC)
        })
        .unwrap_or(false);
    if is_public {
        Ok(target)
    } else {
        Err(LinkageError::IllegalAccess(format!(
            "Receiver method {} is not public",
            rt.classes.method_path(target)
        )))
    }
}
