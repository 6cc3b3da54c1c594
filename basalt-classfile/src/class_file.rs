use crate::{
    access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    constant_pool::{ConstantPool, ConstantPoolIndex},
    descriptor::{FieldType, MethodDescriptor},
    error::ClassFormatError,
    version::Version,
};

/// A parsed and structurally validated class file.
/// Names and descriptors of members are resolved out of the constant pool during parsing, since
/// everything downstream wants them in that form anyway.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ConstantPoolIndex,
    /// `None` only for `java/lang/Object`
    pub super_class: Option<ConstantPoolIndex>,
    pub interfaces: Vec<ConstantPoolIndex>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}
impl ClassFile {
    pub fn this_class_name(&self) -> Result<&str, ClassFormatError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn super_class_name(&self) -> Result<Option<&str>, ClassFormatError> {
        self.super_class
            .map(|index| self.constant_pool.class_name(index))
            .transpose()
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, ClassFormatError> {
        self.interfaces
            .iter()
            .map(|index| self.constant_pool.class_name(*index))
            .collect()
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<(usize, &MethodInfo)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(_, method)| method.name == name && method.descriptor == descriptor)
    }

    #[must_use]
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<(usize, &FieldInfo)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name && field.descriptor == descriptor)
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub field_type: FieldType,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub parsed_descriptor: MethodDescriptor,
    /// Present exactly when the method is neither abstract nor native
    pub code: Option<CodeAttribute>,
    /// Attributes other than `Code`
    pub attributes: Vec<AttributeInfo>,
}
impl MethodInfo {
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// Inclusive
    pub start_pc: u16,
    /// Exclusive
    pub end_pc: u16,
    pub handler_pc: u16,
    /// `None` catches everything
    pub catch_type: Option<ConstantPoolIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: String,
    pub info: Vec<u8>,
}
