//! Internal replacements for native functions
//! The bootstrap classes declare most of their methods as native, and they are implemented here
//! rather than through a native library.

use std::{collections::HashMap, sync::Arc};

use basalt_base::{
    class::{Class, Method},
    default_methods::MethodSignature,
    util::format_method,
    OBJECT_NAME, STRING_NAME, THROWABLE_NAME,
};

use crate::{
    bootstrap::{
        CONSOLE_NAME, INDEX_OUT_OF_BOUNDS_EXCEPTION, NULL_POINTER_EXCEPTION,
        UNSATISFIED_LINK_ERROR,
    },
    class_instance::{ClassInstance, Instance, StringInstance},
    eval::{eval_method, EvalError, EvalMethodValue, Frame, Locals, ValueException},
    gc::GcRef,
    rv::{RuntimeValue, RuntimeValuePrimitive},
    util::{dotted_class_name, expect_instance, get_string_contents, Env},
    GeneralError,
};

/// A native method. The receiver, if there is one, is the first argument.
pub type NativeFn = fn(&mut Env, &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError>;

/// The native methods, keyed by `class.name(descriptor)`
pub struct NativeMethods {
    methods: HashMap<String, NativeFn>,
}
impl NativeMethods {
    #[must_use]
    pub fn new() -> NativeMethods {
        let mut natives = NativeMethods {
            methods: HashMap::new(),
        };

        natives.register(OBJECT_NAME, "hashCode", "()I", object_hash_code);
        natives.register(OBJECT_NAME, "equals", "(Ljava/lang/Object;)Z", object_equals);
        natives.register(
            OBJECT_NAME,
            "toString",
            "()Ljava/lang/String;",
            object_to_string,
        );

        natives.register(STRING_NAME, "length", "()I", string_length);
        natives.register(STRING_NAME, "charAt", "(I)C", string_char_at);
        natives.register(STRING_NAME, "equals", "(Ljava/lang/Object;)Z", string_equals);
        natives.register(STRING_NAME, "hashCode", "()I", string_hash_code);
        natives.register(
            STRING_NAME,
            "toString",
            "()Ljava/lang/String;",
            string_to_string,
        );
        natives.register(
            STRING_NAME,
            "concat",
            "(Ljava/lang/String;)Ljava/lang/String;",
            string_concat,
        );
        natives.register(
            STRING_NAME,
            "valueOf",
            "(I)Ljava/lang/String;",
            string_value_of_int,
        );

        natives.register(
            THROWABLE_NAME,
            "toString",
            "()Ljava/lang/String;",
            throwable_to_string,
        );

        let println: [(&str, NativeFn); 9] = [
            ("()V", console_println_empty),
            ("(Ljava/lang/String;)V", console_println_reference),
            ("(Ljava/lang/Object;)V", console_println_reference),
            ("(I)V", console_println_integer),
            ("(J)V", console_println_integer),
            ("(F)V", console_println_float),
            ("(D)V", console_println_float),
            ("(Z)V", console_println_boolean),
            ("(C)V", console_println_char),
        ];
        for (descriptor, method) in println {
            natives.register(CONSOLE_NAME, "println", descriptor, method);
        }
        natives.register(CONSOLE_NAME, "print", "(Ljava/lang/String;)V", console_print);

        natives
    }

    fn register(&mut self, class_name: &str, name: &str, descriptor: &str, method: NativeFn) {
        self.methods
            .insert(format_method(class_name, name, descriptor), method);
    }

    #[must_use]
    pub fn get(&self, class_name: &str, name: &str, descriptor: &str) -> Option<NativeFn> {
        self.methods
            .get(&format_method(class_name, name, descriptor))
            .copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
impl Default for NativeMethods {
    fn default() -> Self {
        Self::new()
    }
}

/// Call the native implementation of `method`, with the arguments taken from the locals the
/// invoke set up
pub(crate) fn call_native(
    env: &mut Env,
    class: &Arc<Class>,
    method: &Method,
    frame: &Frame,
) -> Result<EvalMethodValue, GeneralError> {
    let native = env
        .rt
        .natives
        .get(class.name(), method.name(), method.descriptor());
    let native = match native {
        Some(native) => native,
        None => {
            let message = format_method(class.name(), method.name(), method.descriptor());
            let exc = env.throw(UNSATISFIED_LINK_ERROR, Some(&message))?;
            return Ok(EvalMethodValue::Exception(exc));
        }
    };

    let args = native_args(method, &frame.locals)?;
    native(env, &args)
}

/// The receiver and parameters, skipping the upper halves of longs and doubles
fn native_args(method: &Method, locals: &Locals) -> Result<Vec<RuntimeValue>, EvalError> {
    let descriptor = method.parsed_descriptor();
    let mut args = Vec::with_capacity(descriptor.parameters.len() + 1);
    let mut index = 0;
    if !method.is_static() {
        args.push(locals.value_at(0)?);
        index += 1;
    }
    for parameter in &descriptor.parameters {
        args.push(locals.value_at(index)?);
        index += if parameter.is_category_2() { 2 } else { 1 };
    }
    Ok(args)
}

fn arg_reference(
    args: &[RuntimeValue],
    index: usize,
) -> Result<Option<GcRef<Instance>>, EvalError> {
    args.get(index)
        .copied()
        .ok_or(EvalError::ExpectedStackValue)?
        .into_reference()
        .ok_or(EvalError::ExpectedStackValueReference)
}

/// The receiver of an instance native, which is never null
fn receiver(args: &[RuntimeValue]) -> Result<GcRef<Instance>, EvalError> {
    arg_reference(args, 0)?.ok_or(EvalError::ExpectedLocalVariableReference(0))
}

fn arg_int(args: &[RuntimeValue], index: usize) -> Result<i32, EvalError> {
    args.get(index)
        .copied()
        .and_then(RuntimeValue::into_int)
        .ok_or(EvalError::ExpectedStackValueIntRepr)
}

fn return_int(value: i32) -> Result<EvalMethodValue, GeneralError> {
    Ok(EvalMethodValue::Return(
        RuntimeValuePrimitive::I32(value).into(),
    ))
}

fn return_bool(value: bool) -> Result<EvalMethodValue, GeneralError> {
    return_int(i32::from(value))
}

fn return_string(env: &Env, text: &str) -> Result<EvalMethodValue, GeneralError> {
    Ok(EvalMethodValue::Return(env.new_string(text)?.into()))
}

fn string_units(env: &Env, string: GcRef<Instance>) -> Result<Vec<u16>, GeneralError> {
    let string = expect_instance::<StringInstance>(&env.rt, string)?;
    env.rt
        .gc
        .deref(string, |string| string.value.clone())
        .ok_or(EvalError::InvalidGcRef(string.into_generic()).into())
}

fn object_hash_code(
    _env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    return_int(receiver(args)?.identity_hash())
}

fn object_equals(_env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let this = receiver(args)?;
    let other = arg_reference(args, 1)?;
    return_bool(other == Some(this))
}

fn object_to_string(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let this = receiver(args)?;
    let text = format!(
        "{}@{:x}",
        dotted_class_name(&env.rt, this),
        this.identity_hash()
    );
    return_string(env, &text)
}

fn string_length(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let units = string_units(env, receiver(args)?)?;
    return_int(i32::try_from(units.len()).unwrap_or(i32::MAX))
}

fn string_char_at(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let units = string_units(env, receiver(args)?)?;
    let index = arg_int(args, 1)?;
    match usize::try_from(index).ok().and_then(|i| units.get(i)) {
        Some(unit) => return_int(i32::from(*unit)),
        None => {
            let message = format!("Index {} out of bounds for length {}", index, units.len());
            let exc = env.throw(INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message))?;
            Ok(EvalMethodValue::Exception(exc))
        }
    }
}

fn string_equals(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let this = receiver(args)?;
    let other = match arg_reference(args, 1)? {
        Some(other) => other,
        None => return return_bool(false),
    };
    if other == this {
        return return_bool(true);
    }
    if env.rt.gc.checked_as::<StringInstance>(other).is_none() {
        return return_bool(false);
    }
    return_bool(string_units(env, this)? == string_units(env, other)?)
}

fn string_hash_code(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let units = string_units(env, receiver(args)?)?;
    let hash = units
        .iter()
        .fold(0_i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(*unit)));
    return_int(hash)
}

fn string_to_string(
    _env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    Ok(EvalMethodValue::Return(receiver(args)?.into()))
}

fn string_concat(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let this = receiver(args)?;
    let other = match arg_reference(args, 1)? {
        Some(other) => other,
        None => {
            let message = "Cannot invoke \"String.length()\" because \"str\" is null";
            let exc = env.throw(NULL_POINTER_EXCEPTION, Some(message))?;
            return Ok(EvalMethodValue::Exception(exc));
        }
    };

    let mut units = string_units(env, this)?;
    units.extend(string_units(env, other)?);
    let string_id = env.rt.gc.class_of(this).ok_or(EvalError::InvalidGcRef(this))?;
    let string = env.rt.gc.alloc(StringInstance {
        instanceof: string_id,
        value: units,
    });
    Ok(EvalMethodValue::Return(string.into()))
}

fn string_value_of_int(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    let value = arg_int(args, 0)?;
    return_string(env, &value.to_string())
}

fn throwable_to_string(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    let this = expect_instance::<ClassInstance>(&env.rt, receiver(args)?)?;
    let text = env.rt.describe_exception(this);
    return_string(env, &text)
}

/// Get the value out of a [`ValueException`], returning the exception from the native method
macro_rules! exc_method {
    ($v:expr) => {
        match $v {
            ValueException::Value(v) => v,
            ValueException::Exception(exc) => return Ok(EvalMethodValue::Exception(exc)),
        }
    };
}

fn print(env: &Env, text: &str, newline: bool) -> Result<EvalMethodValue, GeneralError> {
    env.rt.write_output(text)?;
    if newline {
        env.rt.write_output("\n")?;
    }
    Ok(EvalMethodValue::ReturnVoid)
}

fn console_println_empty(
    env: &mut Env,
    _args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    print(env, "", true)
}

fn console_print(env: &mut Env, args: &[RuntimeValue]) -> Result<EvalMethodValue, GeneralError> {
    let text = exc_method!(display_reference(env, args)?);
    print(env, &text, false)
}

/// `println(String)` and `println(Object)`
fn console_println_reference(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    let text = exc_method!(display_reference(env, args)?);
    print(env, &text, true)
}

/// `println(I)` and `println(J)`
fn console_println_integer(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    let text = match args.first() {
        Some(RuntimeValue::Primitive(RuntimeValuePrimitive::I64(v))) => v.to_string(),
        _ => arg_int(args, 0)?.to_string(),
    };
    print(env, &text, true)
}

/// `println(F)` and `println(D)`
fn console_println_float(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    let text = match args.first() {
        Some(RuntimeValue::Primitive(RuntimeValuePrimitive::F32(v))) => java_float_string(*v),
        Some(RuntimeValue::Primitive(RuntimeValuePrimitive::F64(v))) => java_float_string(*v),
        _ => return Err(EvalError::ExpectedStackValueFloat.into()),
    };
    print(env, &text, true)
}

fn console_println_boolean(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    let text = if arg_int(args, 0)? == 0 { "false" } else { "true" };
    print(env, text, true)
}

fn console_println_char(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<EvalMethodValue, GeneralError> {
    // A lone surrogate prints as the replacement character
    let unit = u32::try_from(arg_int(args, 0)?).unwrap_or(0);
    let text = char::from_u32(unit)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
        .to_string();
    print(env, &text, true)
}

/// Format the single reference argument as `String.valueOf(Object)` would, calling `toString`
/// on objects that aren't strings
fn display_reference(
    env: &mut Env,
    args: &[RuntimeValue],
) -> Result<ValueException<String>, GeneralError> {
    let object = match arg_reference(args, 0)? {
        Some(object) => object,
        None => return Ok(ValueException::Value("null".to_owned())),
    };
    if let Some(text) = get_string_contents(&env.rt, object) {
        return Ok(ValueException::Value(text));
    }

    call_to_string(env, object)
}

/// Invoke `toString` on the object through virtual dispatch
fn call_to_string(
    env: &mut Env,
    object: GcRef<Instance>,
) -> Result<ValueException<String>, GeneralError> {
    let rt = Arc::clone(&env.rt);
    let class_id = rt.gc.class_of(object).ok_or(EvalError::InvalidGcRef(object))?;
    let signature = MethodSignature::new("toString", "()Ljava/lang/String;");

    let from_table = rt.method_table(class_id).and_then(|table| table.get(&signature));
    let target = match from_table {
        Some(target) => target,
        None => {
            let selected = rt
                .classes
                .get_or_load_id(class_id)
                .and_then(|class| rt.classes.select_invocable(&class, &signature));
            match selected {
                Ok(target) => target,
                Err(err) => return Ok(ValueException::Exception(env.throw_linkage(&err)?)),
            }
        }
    };

    let mut frame = Frame::default();
    frame.locals.push_transform(RuntimeValue::Reference(object));
    match eval_method(env, target, frame)? {
        EvalMethodValue::Return(RuntimeValue::Reference(text)) => Ok(ValueException::Value(
            get_string_contents(&rt, text).unwrap_or_default(),
        )),
        EvalMethodValue::Return(_) | EvalMethodValue::ReturnVoid => {
            Ok(ValueException::Value("null".to_owned()))
        }
        EvalMethodValue::Exception(exc) => Ok(ValueException::Exception(exc)),
    }
}

/// Format a float the way `Float.toString` and `Double.toString` do: integral values keep a
/// `.0`, and very large or small magnitudes use `E` notation
fn java_float_string<F>(value: F) -> String
where
    F: Into<f64> + Copy + std::fmt::Display + std::fmt::LowerExp,
{
    let wide: f64 = value.into();
    if wide.is_nan() {
        return "NaN".to_owned();
    }
    if wide.is_infinite() {
        return if wide > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }

    let magnitude = wide.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        let text = value.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{}.0", text)
        }
    } else {
        let text = format!("{:e}", value);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
        if mantissa.contains('.') {
            format!("{}E{}", mantissa, exponent)
        } else {
            format!("{}.0E{}", mantissa, exponent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{java_float_string, NativeMethods};

    #[test]
    fn test_java_float_string() {
        assert_eq!(java_float_string(1.0_f64), "1.0");
        assert_eq!(java_float_string(0.5_f32), "0.5");
        assert_eq!(java_float_string(-0.0_f64), "-0.0");
        assert_eq!(java_float_string(1e10_f64), "1.0E10");
        assert_eq!(java_float_string(1.5e-5_f64), "1.5E-5");
        assert_eq!(java_float_string(f32::NAN), "NaN");
        assert_eq!(java_float_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_natives_registered() {
        let natives = NativeMethods::new();
        assert!(natives
            .get("java/lang/Object", "hashCode", "()I")
            .is_some());
        assert!(natives.get("basalt/Console", "println", "(J)V").is_some());
        assert!(natives.get("java/lang/Object", "wait", "()V").is_none());
    }
}
