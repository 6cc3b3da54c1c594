//! The classes every program can rely on, synthesized rather than read from a class library.
//! Most of their methods are native and implemented by the intrinsics in
//! [`crate::eval::internal_repl`].

use std::collections::HashMap;

use basalt_base::{
    ClassFileLoader, LoadClassFileError, OBJECT_NAME, STRING_NAME, THROWABLE_NAME,
};
use basalt_classfile::{
    builder::{ClassBuilder, Code},
    opcode, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags,
};

/// The class holding the `println` intrinsics
pub const CONSOLE_NAME: &str = "basalt/Console";
/// The field of `java/lang/Throwable` holding the message
pub const DETAIL_MESSAGE_FIELD: &str = "detailMessage";

pub const EXCEPTION_NAME: &str = "java/lang/Exception";
pub const ERROR_NAME: &str = "java/lang/Error";
pub const RUNTIME_EXCEPTION_NAME: &str = "java/lang/RuntimeException";
pub const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";
pub const ARITHMETIC_EXCEPTION: &str = "java/lang/ArithmeticException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION: &str =
    "java/lang/ArrayIndexOutOfBoundsException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "java/lang/NegativeArraySizeException";
pub const CLASS_CAST_EXCEPTION: &str = "java/lang/ClassCastException";
pub const ARRAY_STORE_EXCEPTION: &str = "java/lang/ArrayStoreException";
pub const ILLEGAL_MONITOR_STATE_EXCEPTION: &str = "java/lang/IllegalMonitorStateException";
pub const STACK_OVERFLOW_ERROR: &str = "java/lang/StackOverflowError";
pub const EXCEPTION_IN_INITIALIZER_ERROR: &str = "java/lang/ExceptionInInitializerError";
pub const UNSATISFIED_LINK_ERROR: &str = "java/lang/UnsatisfiedLinkError";
pub const NO_CLASS_DEF_FOUND_ERROR: &str = "java/lang/NoClassDefFoundError";
pub const INDEX_OUT_OF_BOUNDS_EXCEPTION: &str = "java/lang/IndexOutOfBoundsException";
pub const INCOMPATIBLE_CLASS_CHANGE_ERROR: &str = "java/lang/IncompatibleClassChangeError";
pub const ABSTRACT_METHOD_ERROR: &str = "java/lang/AbstractMethodError";
pub const INSTANTIATION_ERROR: &str = "java/lang/InstantiationError";

/// (class, superclass) for every throwable class besides `java/lang/Throwable`
const THROWABLES: &[(&str, &str)] = &[
    (EXCEPTION_NAME, THROWABLE_NAME),
    (ERROR_NAME, THROWABLE_NAME),
    (RUNTIME_EXCEPTION_NAME, EXCEPTION_NAME),
    (NULL_POINTER_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    (ARITHMETIC_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    (INDEX_OUT_OF_BOUNDS_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    (
        ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
        INDEX_OUT_OF_BOUNDS_EXCEPTION,
    ),
    (NEGATIVE_ARRAY_SIZE_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    (CLASS_CAST_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    (ARRAY_STORE_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    (ILLEGAL_MONITOR_STATE_EXCEPTION, RUNTIME_EXCEPTION_NAME),
    ("java/lang/VirtualMachineError", ERROR_NAME),
    (STACK_OVERFLOW_ERROR, "java/lang/VirtualMachineError"),
    ("java/lang/LinkageError", ERROR_NAME),
    (EXCEPTION_IN_INITIALIZER_ERROR, "java/lang/LinkageError"),
    (UNSATISFIED_LINK_ERROR, "java/lang/LinkageError"),
    ("java/lang/ClassFormatError", "java/lang/LinkageError"),
    ("java/lang/VerifyError", "java/lang/LinkageError"),
    (NO_CLASS_DEF_FOUND_ERROR, "java/lang/LinkageError"),
    ("java/lang/ClassCircularityError", "java/lang/LinkageError"),
    (INCOMPATIBLE_CLASS_CHANGE_ERROR, "java/lang/LinkageError"),
    ("java/lang/NoSuchMethodError", INCOMPATIBLE_CLASS_CHANGE_ERROR),
    ("java/lang/NoSuchFieldError", INCOMPATIBLE_CLASS_CHANGE_ERROR),
    ("java/lang/IllegalAccessError", INCOMPATIBLE_CLASS_CHANGE_ERROR),
    (ABSTRACT_METHOD_ERROR, INCOMPATIBLE_CLASS_CHANGE_ERROR),
    (INSTANTIATION_ERROR, INCOMPATIBLE_CLASS_CHANGE_ERROR),
];

fn public() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC
}

fn public_native() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE
}

fn public_static_native() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE
}

fn final_class(name: &str) -> ClassBuilder {
    let mut builder = ClassBuilder::new(name);
    builder.flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER);
    builder
}

/// `<init>()V` that only calls the superclass constructor
fn default_constructor(builder: &mut ClassBuilder, super_name: &str) {
    let init = builder.pool().method_ref(super_name, "<init>", "()V");
    let mut code = Code::new(1, 1);
    code.op(opcode::ALOAD_0)
        .op_u16(opcode::INVOKESPECIAL, init)
        .op(opcode::RETURN);
    builder.method(public(), "<init>", "()V", Some(code));
}

fn object_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new(OBJECT_NAME).with_super(None);
    let mut code = Code::new(0, 1);
    code.op(opcode::RETURN);
    builder.method(public(), "<init>", "()V", Some(code));
    builder.method(public_native(), "hashCode", "()I", None);
    builder.method(public_native(), "equals", "(Ljava/lang/Object;)Z", None);
    builder.method(public_native(), "toString", "()Ljava/lang/String;", None);
    builder.build()
}

fn string_class() -> Vec<u8> {
    let mut builder = final_class(STRING_NAME);
    default_constructor(&mut builder, OBJECT_NAME);
    builder.method(public_native(), "length", "()I", None);
    builder.method(public_native(), "charAt", "(I)C", None);
    builder.method(public_native(), "equals", "(Ljava/lang/Object;)Z", None);
    builder.method(public_native(), "hashCode", "()I", None);
    builder.method(public_native(), "toString", "()Ljava/lang/String;", None);
    builder.method(
        public_native(),
        "concat",
        "(Ljava/lang/String;)Ljava/lang/String;",
        None,
    );
    builder.method(
        public_static_native(),
        "valueOf",
        "(I)Ljava/lang/String;",
        None,
    );
    builder.build()
}

fn throwable_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new(THROWABLE_NAME);
    builder.field(
        FieldAccessFlags::PRIVATE,
        DETAIL_MESSAGE_FIELD,
        "Ljava/lang/String;",
    );
    default_constructor(&mut builder, OBJECT_NAME);

    let object_init = builder.pool().method_ref(OBJECT_NAME, "<init>", "()V");
    let message =
        builder
            .pool()
            .field_ref(THROWABLE_NAME, DETAIL_MESSAGE_FIELD, "Ljava/lang/String;");

    let mut code = Code::new(2, 2);
    code.op(opcode::ALOAD_0)
        .op_u16(opcode::INVOKESPECIAL, object_init)
        .op(opcode::ALOAD_0)
        .op(opcode::ALOAD_1)
        .op_u16(opcode::PUTFIELD, message)
        .op(opcode::RETURN);
    builder.method(public(), "<init>", "(Ljava/lang/String;)V", Some(code));

    let mut code = Code::new(1, 1);
    code.op(opcode::ALOAD_0)
        .op_u16(opcode::GETFIELD, message)
        .op(opcode::ARETURN);
    builder.method(public(), "getMessage", "()Ljava/lang/String;", Some(code));

    builder.method(public_native(), "toString", "()Ljava/lang/String;", None);
    builder.build()
}

/// A throwable class with the two usual constructors, passing on to the superclass
fn throwable_subclass(name: &str, super_name: &str) -> Vec<u8> {
    let mut builder = ClassBuilder::new(name).with_super(Some(super_name));
    default_constructor(&mut builder, super_name);

    let super_init = builder
        .pool()
        .method_ref(super_name, "<init>", "(Ljava/lang/String;)V");
    let mut code = Code::new(2, 2);
    code.op(opcode::ALOAD_0)
        .op(opcode::ALOAD_1)
        .op_u16(opcode::INVOKESPECIAL, super_init)
        .op(opcode::RETURN);
    builder.method(public(), "<init>", "(Ljava/lang/String;)V", Some(code));
    builder.build()
}

fn console_class() -> Vec<u8> {
    let mut builder = final_class(CONSOLE_NAME);
    for descriptor in [
        "()V",
        "(Ljava/lang/String;)V",
        "(Ljava/lang/Object;)V",
        "(I)V",
        "(J)V",
        "(F)V",
        "(D)V",
        "(Z)V",
        "(C)V",
    ] {
        builder.method(public_static_native(), "println", descriptor, None);
    }
    builder.method(
        public_static_native(),
        "print",
        "(Ljava/lang/String;)V",
        None,
    );
    builder.build()
}

/// Build every bootstrap class file, keyed by class name
#[must_use]
pub fn bootstrap_class_files() -> HashMap<String, Vec<u8>> {
    let mut files = HashMap::new();
    files.insert(OBJECT_NAME.to_owned(), object_class());
    files.insert(STRING_NAME.to_owned(), string_class());
    files.insert(THROWABLE_NAME.to_owned(), throwable_class());
    for (name, super_name) in THROWABLES {
        files.insert((*name).to_owned(), throwable_subclass(name, super_name));
    }
    for interface in basalt_base::util::ARRAY_INTERFACE_NAMES {
        files.insert(
            interface.to_owned(),
            ClassBuilder::interface(interface).build(),
        );
    }
    files.insert(CONSOLE_NAME.to_owned(), console_class());
    files
}

/// Serves the bootstrap classes. It goes first in the loader chain, so user class paths can't
/// replace them.
pub struct BootstrapClasses {
    files: HashMap<String, Vec<u8>>,
}
impl BootstrapClasses {
    #[must_use]
    pub fn new() -> BootstrapClasses {
        BootstrapClasses {
            files: bootstrap_class_files(),
        }
    }
}
impl Default for BootstrapClasses {
    fn default() -> Self {
        Self::new()
    }
}
impl ClassFileLoader for BootstrapClasses {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        Ok(self.files.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::{bootstrap_class_files, THROWABLES};

    #[test]
    fn test_bootstrap_classes_parse() {
        let files = bootstrap_class_files();
        assert_eq!(files.len(), THROWABLES.len() + 6);
        for (name, data) in &files {
            let class = basalt_classfile::parse(data).unwrap();
            assert_eq!(class.this_class_name().unwrap(), name);
        }
    }
}
