#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Class files are limited to u16 counts nearly everywhere, and we check before truncating.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]

//! Reading, validating and writing of JVM class files.
//!
//! [`parse`] turns the raw bytes of a class file into a [`ClassFile`], performing the structural
//! checks that must hold before a class can even be considered for loading: the magic number,
//! the supported version range, constant pool well-formedness, access flag combinations,
//! descriptors and duplicate members. Any failure aborts the whole parse.
//!
//! [`builder::ClassBuilder`] goes the other way, and is used for synthesizing classes.

pub mod access_flags;
pub mod binary_format;
pub mod builder;
pub mod class_file;
pub mod constant_pool;
pub mod descriptor;
mod error;
pub mod names;
pub mod opcode;
mod parser;
pub mod version;

pub use access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
pub use class_file::{
    AttributeInfo, ClassFile, CodeAttribute, ExceptionTableEntry, FieldInfo, MethodInfo,
};
pub use constant_pool::{ConstantPool, ConstantPoolEntry, ConstantPoolIndex, ConstantTag};
pub use descriptor::{DescriptorError, FieldType, MethodDescriptor};
pub use error::{ClassFormatError, ClassFormatErrorKind};
pub use version::Version;

/// The magic number every class file begins with
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Parse and structurally validate a class file.
/// No partially constructed class is ever returned: the first problem aborts the parse.
pub fn parse(data: &[u8]) -> Result<ClassFile, ClassFormatError> {
    parser::parse_class_file(data)
}

/// Convert the modified utf8 used in class files into a rust string, replacing anything
/// invalid. Intended for printing, not for anything that needs to be exact.
#[must_use]
pub fn convert_classfile_text(data: &[u8]) -> std::borrow::Cow<'_, str> {
    cesu8::from_java_cesu8(data).unwrap_or_else(|_| String::from_utf8_lossy(data))
}
