use std::fmt;

use crate::error::{ClassFormatError, ClassFormatErrorKind};

/// An index into the constant pool. Zero is never a valid entry, and is used by the format to
/// mean 'nothing' in the places that allow it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantPoolIndex(pub u16);
impl ConstantPoolIndex {
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}
impl fmt::Display for ConstantPoolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstantTag {
    /// The second slot of a long or double, or the zeroth slot
    Unusable,
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    FieldRef,
    MethodRef,
    InterfaceMethodRef,
    NameAndType,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    Module,
    Package,
}
impl ConstantTag {
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<ConstantTag> {
        Some(match tag {
            1 => ConstantTag::Utf8,
            3 => ConstantTag::Integer,
            4 => ConstantTag::Float,
            5 => ConstantTag::Long,
            6 => ConstantTag::Double,
            7 => ConstantTag::Class,
            8 => ConstantTag::String,
            9 => ConstantTag::FieldRef,
            10 => ConstantTag::MethodRef,
            11 => ConstantTag::InterfaceMethodRef,
            12 => ConstantTag::NameAndType,
            15 => ConstantTag::MethodHandle,
            16 => ConstantTag::MethodType,
            17 => ConstantTag::Dynamic,
            18 => ConstantTag::InvokeDynamic,
            19 => ConstantTag::Module,
            20 => ConstantTag::Package,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            ConstantTag::Unusable => 0,
            ConstantTag::Utf8 => 1,
            ConstantTag::Integer => 3,
            ConstantTag::Float => 4,
            ConstantTag::Long => 5,
            ConstantTag::Double => 6,
            ConstantTag::Class => 7,
            ConstantTag::String => 8,
            ConstantTag::FieldRef => 9,
            ConstantTag::MethodRef => 10,
            ConstantTag::InterfaceMethodRef => 11,
            ConstantTag::NameAndType => 12,
            ConstantTag::MethodHandle => 15,
            ConstantTag::MethodType => 16,
            ConstantTag::Dynamic => 17,
            ConstantTag::InvokeDynamic => 18,
            ConstantTag::Module => 19,
            ConstantTag::Package => 20,
        }
    }

    /// Whether the entry takes up two slots in the pool
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(self, ConstantTag::Long | ConstantTag::Double)
    }
}
impl fmt::Display for ConstantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstantTag::Unusable => "Unusable",
            ConstantTag::Utf8 => "Utf8",
            ConstantTag::Integer => "Integer",
            ConstantTag::Float => "Float",
            ConstantTag::Long => "Long",
            ConstantTag::Double => "Double",
            ConstantTag::Class => "Class",
            ConstantTag::String => "String",
            ConstantTag::FieldRef => "Fieldref",
            ConstantTag::MethodRef => "Methodref",
            ConstantTag::InterfaceMethodRef => "InterfaceMethodref",
            ConstantTag::NameAndType => "NameAndType",
            ConstantTag::MethodHandle => "MethodHandle",
            ConstantTag::MethodType => "MethodType",
            ConstantTag::Dynamic => "Dynamic",
            ConstantTag::InvokeDynamic => "InvokeDynamic",
            ConstantTag::Module => "Module",
            ConstantTag::Package => "Package",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub class_index: ConstantPoolIndex,
    pub name_and_type_index: ConstantPoolIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry {
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: ConstantPoolIndex,
    },
    String {
        string_index: ConstantPoolIndex,
    },
    FieldRef(MemberRef),
    MethodRef(MemberRef),
    InterfaceMethodRef(MemberRef),
    NameAndType {
        name_index: ConstantPoolIndex,
        descriptor_index: ConstantPoolIndex,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: ConstantPoolIndex,
    },
    MethodType {
        descriptor_index: ConstantPoolIndex,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: ConstantPoolIndex,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: ConstantPoolIndex,
    },
    Module {
        name_index: ConstantPoolIndex,
    },
    Package {
        name_index: ConstantPoolIndex,
    },
}
impl ConstantPoolEntry {
    #[must_use]
    pub fn tag(&self) -> ConstantTag {
        match self {
            ConstantPoolEntry::Unusable => ConstantTag::Unusable,
            ConstantPoolEntry::Utf8(_) => ConstantTag::Utf8,
            ConstantPoolEntry::Integer(_) => ConstantTag::Integer,
            ConstantPoolEntry::Float(_) => ConstantTag::Float,
            ConstantPoolEntry::Long(_) => ConstantTag::Long,
            ConstantPoolEntry::Double(_) => ConstantTag::Double,
            ConstantPoolEntry::Class { .. } => ConstantTag::Class,
            ConstantPoolEntry::String { .. } => ConstantTag::String,
            ConstantPoolEntry::FieldRef(_) => ConstantTag::FieldRef,
            ConstantPoolEntry::MethodRef(_) => ConstantTag::MethodRef,
            ConstantPoolEntry::InterfaceMethodRef(_) => ConstantTag::InterfaceMethodRef,
            ConstantPoolEntry::NameAndType { .. } => ConstantTag::NameAndType,
            ConstantPoolEntry::MethodHandle { .. } => ConstantTag::MethodHandle,
            ConstantPoolEntry::MethodType { .. } => ConstantTag::MethodType,
            ConstantPoolEntry::Dynamic { .. } => ConstantTag::Dynamic,
            ConstantPoolEntry::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
            ConstantPoolEntry::Module { .. } => ConstantTag::Module,
            ConstantPoolEntry::Package { .. } => ConstantTag::Package,
        }
    }
}

/// The resolved textual form of a field or method reference
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemberRefInfo<'a> {
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstantPool {
    /// Index zero is always [`ConstantPoolEntry::Unusable`], so the indices in the class file can
    /// be used directly
    entries: Vec<ConstantPoolEntry>,
}
impl ConstantPool {
    pub(crate) fn from_entries(entries: Vec<ConstantPoolEntry>) -> ConstantPool {
        debug_assert!(matches!(entries.first(), Some(ConstantPoolEntry::Unusable)));
        ConstantPool { entries }
    }

    /// The `constant_pool_count` as written in the class file, one more than the number of
    /// usable slots
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over every slot that is not unusable, along with its index
    pub fn iter(&self) -> impl Iterator<Item = (ConstantPoolIndex, &ConstantPoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !matches!(entry, ConstantPoolEntry::Unusable))
            .map(|(i, entry)| (ConstantPoolIndex(i as u16), entry))
    }

    pub fn get(&self, index: ConstantPoolIndex) -> Result<&ConstantPoolEntry, ClassFormatError> {
        match self.entries.get(usize::from(index.0)) {
            Some(ConstantPoolEntry::Unusable) | None => {
                Err(ClassFormatErrorKind::ConstantIndexOutOfBounds { index: index.0 }.into())
            }
            Some(entry) => Ok(entry),
        }
    }

    pub fn tag(&self, index: ConstantPoolIndex) -> Result<ConstantTag, ClassFormatError> {
        self.get(index).map(ConstantPoolEntry::tag)
    }

    fn mismatch(
        &self,
        index: ConstantPoolIndex,
        expected: ConstantTag,
        found: &ConstantPoolEntry,
    ) -> ClassFormatError {
        ClassFormatErrorKind::ConstantTagMismatch {
            index: index.0,
            expected,
            found: found.tag(),
        }
        .into()
    }

    pub fn utf8(&self, index: ConstantPoolIndex) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(text) => Ok(text),
            entry => Err(self.mismatch(index, ConstantTag::Utf8, entry)),
        }
    }

    /// Get the name of the class referenced by a Class entry
    pub fn class_name(&self, index: ConstantPoolIndex) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(*name_index),
            entry => Err(self.mismatch(index, ConstantTag::Class, entry)),
        }
    }

    /// Get the (name, descriptor) of a `NameAndType` entry
    pub fn name_and_type(
        &self,
        index: ConstantPoolIndex,
    ) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            entry => Err(self.mismatch(index, ConstantTag::NameAndType, entry)),
        }
    }

    fn member_ref_info(&self, member: MemberRef) -> Result<MemberRefInfo<'_>, ClassFormatError> {
        let class_name = self.class_name(member.class_index)?;
        let (name, descriptor) = self.name_and_type(member.name_and_type_index)?;
        Ok(MemberRefInfo {
            class_name,
            name,
            descriptor,
        })
    }

    pub fn field_ref(&self, index: ConstantPoolIndex) -> Result<MemberRefInfo<'_>, ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::FieldRef(member) => self.member_ref_info(*member),
            entry => Err(self.mismatch(index, ConstantTag::FieldRef, entry)),
        }
    }

    pub fn method_ref(
        &self,
        index: ConstantPoolIndex,
    ) -> Result<MemberRefInfo<'_>, ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::MethodRef(member) => self.member_ref_info(*member),
            entry => Err(self.mismatch(index, ConstantTag::MethodRef, entry)),
        }
    }

    pub fn interface_method_ref(
        &self,
        index: ConstantPoolIndex,
    ) -> Result<MemberRefInfo<'_>, ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::InterfaceMethodRef(member) => self.member_ref_info(*member),
            entry => Err(self.mismatch(index, ConstantTag::InterfaceMethodRef, entry)),
        }
    }

    /// Get either kind of method reference, along with whether it was an interface method ref.
    /// `invokestatic` and `invokespecial` accept both.
    pub fn any_method_ref(
        &self,
        index: ConstantPoolIndex,
    ) -> Result<(MemberRefInfo<'_>, bool), ClassFormatError> {
        match self.get(index)? {
            ConstantPoolEntry::MethodRef(member) => Ok((self.member_ref_info(*member)?, false)),
            ConstantPoolEntry::InterfaceMethodRef(member) => {
                Ok((self.member_ref_info(*member)?, true))
            }
            entry => Err(self.mismatch(index, ConstantTag::MethodRef, entry)),
        }
    }

    /// Check that the entry at `index` has the `expected` tag
    pub(crate) fn expect_tag(
        &self,
        index: ConstantPoolIndex,
        expected: ConstantTag,
    ) -> Result<(), ClassFormatError> {
        let entry = self.get(index)?;
        if entry.tag() == expected {
            Ok(())
        } else {
            Err(self.mismatch(index, expected, entry))
        }
    }
}
