use std::fmt;

use thiserror::Error;

use crate::{constant_pool::ConstantTag, descriptor::DescriptorError};

/// A class file was structurally invalid.
/// This is what the JVM surfaces as `java/lang/ClassFormatError`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFormatError {
    /// The byte offset into the class file that was being read, if the failure happened while
    /// reading rather than while validating already-read data.
    pub offset: Option<usize>,
    pub kind: ClassFormatErrorKind,
}
impl ClassFormatError {
    #[must_use]
    pub fn new(kind: ClassFormatErrorKind) -> ClassFormatError {
        ClassFormatError { offset: None, kind }
    }

    #[must_use]
    pub fn at(offset: usize, kind: ClassFormatErrorKind) -> ClassFormatError {
        ClassFormatError {
            offset: Some(offset),
            kind,
        }
    }
}
impl From<ClassFormatErrorKind> for ClassFormatError {
    fn from(kind: ClassFormatErrorKind) -> Self {
        ClassFormatError::new(kind)
    }
}
impl fmt::Display for ClassFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(offset) = self.offset {
            write!(f, "{} (at offset {})", self.kind, offset)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}
impl std::error::Error for ClassFormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ClassFormatErrorKind {
    /// The data ended before the structure being read was complete
    #[error("truncated class file, {needed} more byte(s) were needed")]
    Truncated { needed: usize },
    #[error("incompatible magic value 0x{0:08X}")]
    BadMagic(u32),
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("illegal constant pool tag {tag} at index {index}")]
    BadConstantTag { index: u16, tag: u8 },
    #[error("constant pool index {index} is out of bounds")]
    ConstantIndexOutOfBounds { index: u16 },
    #[error("constant pool index {index} should be {expected} but was {found}")]
    ConstantTagMismatch {
        index: u16,
        expected: ConstantTag,
        found: ConstantTag,
    },
    /// A long or double entry was the final entry, leaving no room for its second slot
    #[error("wide constant at index {index} has no room for its second slot")]
    WideConstantOverflow { index: u16 },
    #[error("illegal modified UTF8 string in constant pool at index {index}")]
    BadUtf8 { index: u16 },
    #[error("illegal method handle kind {kind} at index {index}")]
    BadMethodHandleKind { index: u16, kind: u8 },
    #[error("illegal class modifiers in class {name}: 0x{flags:04X}")]
    IllegalClassFlags { name: String, flags: u16 },
    #[error("illegal field modifiers in field {name}: 0x{flags:04X}")]
    IllegalFieldFlags { name: String, flags: u16 },
    #[error("method {name}{descriptor} has illegal modifiers: 0x{flags:04X}")]
    IllegalMethodFlags {
        name: String,
        descriptor: String,
        flags: u16,
    },
    #[error("duplicate field name \"{name}\" with signature \"{descriptor}\"")]
    DuplicateField { name: String, descriptor: String },
    #[error("duplicate method name \"{name}\" with signature \"{descriptor}\"")]
    DuplicateMethod { name: String, descriptor: String },
    #[error("illegal descriptor \"{descriptor}\": {source}")]
    InvalidDescriptor {
        descriptor: String,
        source: DescriptorError,
    },
    #[error("method \"{name}\" has illegal signature \"{descriptor}\"")]
    IllegalSignature { name: String, descriptor: String },
    #[error("illegal name \"{0}\"")]
    InvalidName(String),
    #[error("class {0} has no superclass, which only java/lang/Object may do")]
    MissingSuperClass(String),
    #[error("interface {0} must have java/lang/Object as its superclass")]
    InterfaceSuperClass(String),
    #[error("method {name}{descriptor} has no Code attribute")]
    MissingCode { name: String, descriptor: String },
    #[error("abstract or native method {name}{descriptor} has a Code attribute")]
    UnexpectedCode { name: String, descriptor: String },
    #[error("method {name}{descriptor} has multiple Code attributes")]
    MultipleCode { name: String, descriptor: String },
    #[error("malformed {attribute} attribute: {reason}")]
    MalformedAttribute {
        attribute: &'static str,
        reason: &'static str,
    },
    #[error("{0} extra byte(s) at the end of the class file")]
    TrailingBytes(usize),
}
