use std::sync::{Arc, OnceLock};

use basalt_classfile::{
    ClassAccessFlags, CodeAttribute, ConstantPool, FieldAccessFlags, FieldType,
    MethodAccessFlags, MethodDescriptor, Version,
};
use indexmap::IndexSet;

use crate::{
    code::{op_ex::InstructionParseError, CodeInfo},
    id::{ClassId, FieldId, MethodId, MethodIndex, PackageId},
    resolve::ConstantPoolCache,
};

/// A loaded class, interface or array class.
/// Created once by [`crate::Classes`] and immutable afterwards, apart from the lazily filled
/// caches.
#[derive(Debug)]
pub struct Class {
    pub(crate) id: ClassId,
    pub(crate) name: Arc<str>,
    pub(crate) package: PackageId,
    pub(crate) access_flags: ClassAccessFlags,
    /// `None` only for `java/lang/Object`
    pub(crate) super_class: Option<ClassId>,
    /// The directly implemented or extended interfaces, in declaration order
    pub(crate) interfaces: Vec<ClassId>,
    /// Every superinterface, ordered by a preorder walk of the declared interfaces followed by
    /// the interfaces of the superclass
    pub(crate) all_interfaces: IndexSet<ClassId>,
    pub(crate) methods: Vec<Method>,
    pub(crate) fields: Vec<Field>,
    pub(crate) variant: ClassVariant,
}
impl Class {
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn package(&self) -> PackageId {
        self.package
    }

    #[must_use]
    pub fn access_flags(&self) -> ClassAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn super_id(&self) -> Option<ClassId> {
        self.super_class
    }

    #[must_use]
    pub fn interfaces(&self) -> &[ClassId] {
        &self.interfaces
    }

    #[must_use]
    pub fn all_interfaces(&self) -> &IndexSet<ClassId> {
        &self.all_interfaces
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::PUBLIC)
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.variant, ClassVariant::Array(_))
    }

    #[must_use]
    pub fn variant(&self) -> &ClassVariant {
        &self.variant
    }

    #[must_use]
    pub fn class_file_info(&self) -> Option<&ClassFileInfo> {
        match &self.variant {
            ClassVariant::Class(info) => Some(info),
            ClassVariant::Array(_) => None,
        }
    }

    #[must_use]
    pub fn array(&self) -> Option<&ArrayClass> {
        match &self.variant {
            ClassVariant::Array(array) => Some(array),
            ClassVariant::Class(_) => None,
        }
    }

    #[must_use]
    pub fn constant_pool(&self) -> Option<&ConstantPool> {
        self.class_file_info().map(|info| &info.constant_pool)
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    #[must_use]
    pub fn method(&self, index: MethodIndex) -> Option<&Method> {
        self.methods.get(usize::from(index))
    }

    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: u16) -> Option<&Field> {
        self.fields.get(usize::from(index))
    }

    #[must_use]
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }
}

#[derive(Debug)]
pub enum ClassVariant {
    Class(ClassFileInfo),
    Array(ArrayClass),
}

/// The parts of the class file that are needed after loading
#[derive(Debug)]
pub struct ClassFileInfo {
    pub(crate) version: Version,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) constant_cache: ConstantPoolCache,
}
impl ClassFileInfo {
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    #[must_use]
    pub fn constant_cache(&self) -> &ConstantPoolCache {
        &self.constant_cache
    }
}

#[derive(Debug, Clone)]
pub struct ArrayClass {
    pub(crate) component: FieldType,
    /// The class of the component, if the component is a reference type
    pub(crate) component_id: Option<ClassId>,
}
impl ArrayClass {
    #[must_use]
    pub fn component(&self) -> &FieldType {
        &self.component
    }

    #[must_use]
    pub fn component_id(&self) -> Option<ClassId> {
        self.component_id
    }
}

#[derive(Debug)]
pub struct Method {
    pub(crate) id: MethodId,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) parsed_descriptor: MethodDescriptor,
    pub(crate) access_flags: MethodAccessFlags,
    pub(crate) code: Option<CodeAttribute>,
    /// The decoded instructions, filled on first use
    pub(crate) decoded: OnceLock<Result<Arc<CodeInfo>, InstructionParseError>>,
}
impl Method {
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[must_use]
    pub fn parsed_descriptor(&self) -> &MethodDescriptor {
        &self.parsed_descriptor
    }

    #[must_use]
    pub fn access_flags(&self) -> MethodAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    #[must_use]
    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PRIVATE)
    }

    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    #[must_use]
    pub fn is_init(&self) -> bool {
        self.name == "<init>"
    }

    /// The raw code attribute, present exactly when the method is neither abstract nor native
    #[must_use]
    pub fn code_attribute(&self) -> Option<&CodeAttribute> {
        self.code.as_ref()
    }

    /// Get the decoded code of the method, decoding it on first use
    pub fn code(&self) -> Result<Option<Arc<CodeInfo>>, InstructionParseError> {
        let code = match &self.code {
            Some(code) => code,
            None => return Ok(None),
        };

        self.decoded
            .get_or_init(|| CodeInfo::decode(code).map(Arc::new))
            .clone()
            .map(Some)
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) id: FieldId,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) field_type: FieldType,
    pub(crate) access_flags: FieldAccessFlags,
}
impl Field {
    #[must_use]
    pub fn id(&self) -> FieldId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[must_use]
    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    #[must_use]
    pub fn access_flags(&self) -> FieldAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}
