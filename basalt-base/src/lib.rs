#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// Cool idea but highlights entire function and is too aggressive.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
// Class files limit most counts to u16, and the loader checks before truncating
#![allow(clippy::cast_possible_truncation)]

use basalt_classfile::ClassFormatError;

pub mod class;
pub mod code;
pub mod data;
pub mod default_methods;
pub mod id;
pub mod package;
pub mod resolve;
pub mod util;

pub use data::class_file_loader::{ClassFileLoader, LoadClassFileError, LoaderChain};
pub use data::class_names::ClassNames;
pub use data::classes::Classes;

/// The binary name of `java/lang/Object`
pub const OBJECT_NAME: &str = "java/lang/Object";
/// The binary name of `java/lang/Throwable`
pub const THROWABLE_NAME: &str = "java/lang/Throwable";
/// The binary name of `java/lang/String`, the type of string constants
pub const STRING_NAME: &str = "java/lang/String";

/// An error from linking a class or a symbolic reference.
/// Each variant corresponds to the java error class it is thrown as, see
/// [`LinkageError::java_class_name`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum LinkageError {
    /// The class file was malformed
    #[error("{class}: {source}")]
    ClassFormat {
        class: String,
        source: ClassFormatError,
    },
    /// The class's bytecode failed verification
    #[error("{0}")]
    Verify(String),
    #[error("{0}")]
    NoSuchMethod(String),
    #[error("{0}")]
    NoSuchField(String),
    #[error("{0}")]
    IllegalAccess(String),
    #[error("{0}")]
    IncompatibleClassChange(String),
    #[error("{0}")]
    AbstractMethod(String),
    /// The class could not be found, or failed to be defined
    #[error("{0}")]
    NoClassDefFound(String),
    /// The class is its own superclass or superinterface
    #[error("{0}")]
    ClassCircularity(String),
}
impl LinkageError {
    /// The binary name of the java class this error is thrown as
    #[must_use]
    pub fn java_class_name(&self) -> &'static str {
        match self {
            LinkageError::ClassFormat { .. } => "java/lang/ClassFormatError",
            LinkageError::Verify(_) => "java/lang/VerifyError",
            LinkageError::NoSuchMethod(_) => "java/lang/NoSuchMethodError",
            LinkageError::NoSuchField(_) => "java/lang/NoSuchFieldError",
            LinkageError::IllegalAccess(_) => "java/lang/IllegalAccessError",
            LinkageError::IncompatibleClassChange(_) => {
                "java/lang/IncompatibleClassChangeError"
            }
            LinkageError::AbstractMethod(_) => "java/lang/AbstractMethodError",
            LinkageError::NoClassDefFound(_) => "java/lang/NoClassDefFoundError",
            LinkageError::ClassCircularity(_) => "java/lang/ClassCircularityError",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to log each class as it is loaded.
    pub log_load: bool,
}
impl Default for Config {
    fn default() -> Self {
        Self { log_load: true }
    }
}
