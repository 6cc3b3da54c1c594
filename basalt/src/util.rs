use std::{
    sync::Arc,
    thread::{self, ThreadId},
};

use basalt_base::{
    class::Class, id::FieldId, util::to_dotted_name, Classes, LinkageError, STRING_NAME,
    THROWABLE_NAME,
};
use basalt_classfile::FieldType;

use crate::{
    bootstrap::{DETAIL_MESSAGE_FIELD, NEGATIVE_ARRAY_SIZE_EXCEPTION},
    class_instance::{ArrayInstance, ClassInstance, Fields, Instance, StringInstance},
    eval::{EvalError, ValueException},
    gc::GcRef,
    rv::RuntimeValue,
    GeneralError, Runtime,
};

/// The state of one interpreter thread.
/// The runtime is shared, while frames and the call depth belong to the thread.
pub struct Env {
    pub rt: Arc<Runtime>,
    pub thread_id: ThreadId,
    /// The number of method activations currently running on this thread
    pub(crate) depth: usize,
}
impl Env {
    /// An environment for the current thread
    #[must_use]
    pub fn new(rt: Arc<Runtime>) -> Env {
        Env {
            rt,
            thread_id: thread::current().id(),
            depth: 0,
        }
    }

    /// Construct an exception of the given bootstrap class.
    /// No constructor is run, the message is stored directly.
    pub fn throw(
        &self,
        class_name: &str,
        message: Option<&str>,
    ) -> Result<GcRef<ClassInstance>, GeneralError> {
        let class = self.rt.classes.get_or_load(class_name)?;
        self.rt.link(class.id())?;

        let mut fields = make_instance_fields(&self.rt.classes, &class);
        if let Some(message) = message {
            let message = self.new_string(message)?;
            fields.set(detail_message_field(&self.rt)?, message.into());
        }

        tracing::info!(
            "Throwing {}{}",
            class_name,
            message.map(|m| format!(": {}", m)).unwrap_or_default()
        );
        Ok(self.rt.gc.alloc(ClassInstance::new(class.id(), fields)))
    }

    /// Construct the java error a linkage error is thrown as
    pub fn throw_linkage(&self, err: &LinkageError) -> Result<GcRef<ClassInstance>, GeneralError> {
        self.throw(err.java_class_name(), Some(&err.to_string()))
    }

    /// Allocate a new string, which is not interned
    pub fn new_string(&self, text: &str) -> Result<GcRef<StringInstance>, GeneralError> {
        let string_id = string_class(&self.rt)?.id();
        Ok(self.rt.gc.alloc(StringInstance::new(string_id, text)))
    }

    /// Get the interned string with the given contents
    pub fn intern_string(&self, text: &str) -> Result<GcRef<StringInstance>, GeneralError> {
        let string_id = string_class(&self.rt)?.id();
        Ok(self.rt.strings.intern(&self.rt.gc, string_id, text))
    }
}

/// Get `java/lang/String`, linking it so that strings can be used as receivers
pub(crate) fn string_class(rt: &Runtime) -> Result<Arc<Class>, GeneralError> {
    let class = rt.classes.get_or_load(STRING_NAME)?;
    rt.link(class.id())?;
    Ok(class)
}

/// The fields of an instance of the class, including those declared by its superclasses, with
/// their default values
#[must_use]
pub fn make_instance_fields(classes: &Classes, class: &Arc<Class>) -> Fields {
    let mut fields = Fields::default();
    for class in classes.super_chain(Arc::clone(class)) {
        for field in class.fields().iter().filter(|field| !field.is_static()) {
            fields.insert(field.id(), RuntimeValue::default_for(field.field_type()));
        }
    }
    fields
}

pub(crate) fn detail_message_field(rt: &Runtime) -> Result<FieldId, GeneralError> {
    let throwable = rt.classes.get_or_load(THROWABLE_NAME)?;
    throwable
        .find_field(DETAIL_MESSAGE_FIELD, "Ljava/lang/String;")
        .map(basalt_base::class::Field::id)
        .ok_or_else(|| {
            LinkageError::NoSuchField(basalt_base::util::format_field(
                THROWABLE_NAME,
                DETAIL_MESSAGE_FIELD,
                "Ljava/lang/String;",
            ))
            .into()
        })
}

/// Get the contents of a string object
#[must_use]
pub fn get_string_contents(rt: &Runtime, string: GcRef<Instance>) -> Option<String> {
    rt.gc
        .deref(string.unchecked_as::<StringInstance>(), StringInstance::to_rust_string)
}

/// The message of a throwable, if it has one
#[must_use]
pub fn exception_message(rt: &Runtime, exc: GcRef<ClassInstance>) -> Option<String> {
    let field_id = detail_message_field(rt).ok()?;
    let message = rt.gc.deref(exc, |exc| exc.fields.get(field_id))??;
    let message = message.into_reference()??;
    get_string_contents(rt, message)
}

/// The dotted name of the class an object is an instance of, like `java.lang.String`
#[must_use]
pub fn dotted_class_name<T>(rt: &Runtime, object: GcRef<T>) -> String {
    rt.gc
        .class_of(object)
        .map(|id| to_dotted_name(&rt.classes.names().tpath(id)))
        .unwrap_or_default()
}

/// Create an array with the given element type, filled with default values.
/// A negative length throws `NegativeArraySizeException`.
pub fn new_array(
    env: &mut Env,
    element_type: &FieldType,
    length: i32,
) -> Result<ValueException<GcRef<ArrayInstance>>, GeneralError> {
    let length = match usize::try_from(length) {
        Ok(length) => length,
        Err(_) => {
            let exc = env.throw(NEGATIVE_ARRAY_SIZE_EXCEPTION, Some(&length.to_string()))?;
            return Ok(ValueException::Exception(exc));
        }
    };

    let name = format!("[{}", element_type);
    let class = match env.rt.classes.get_or_load(&name) {
        Ok(class) => class,
        Err(err) => return Ok(ValueException::Exception(env.throw_linkage(&err)?)),
    };
    if let Err(err) = env.rt.link(class.id()) {
        return Ok(ValueException::Exception(env.throw_linkage(&err)?));
    }

    let elements = vec![RuntimeValue::default_for(element_type); length];
    let array = ArrayInstance::new(class.id(), element_type.clone(), elements);
    Ok(ValueException::Value(env.rt.gc.alloc(array)))
}

/// Check that a reference holds a `T`, for values that verification has already typed
pub(crate) fn expect_instance<T>(
    rt: &Runtime,
    reference: GcRef<Instance>,
) -> Result<GcRef<T>, GeneralError>
where
    for<'a> &'a T: TryFrom<&'a Instance>,
{
    rt.gc
        .checked_as::<T>(reference)
        .ok_or(EvalError::InvalidGcRef(reference).into())
}
