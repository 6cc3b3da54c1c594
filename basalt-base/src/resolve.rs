use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use basalt_classfile::{
    ClassFormatErrorKind, ConstantPoolEntry, ConstantPoolIndex, ConstantTag, FieldAccessFlags,
    MethodAccessFlags,
};

use crate::{
    class::Class,
    default_methods,
    id::{ClassId, FieldId, MethodId},
    util, Classes, LinkageError, OBJECT_NAME,
};

/// What a constant pool entry resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedSymbol {
    Class(ClassId),
    Field(FieldId),
    Method(MethodId),
}

/// The kind of symbolic reference an instruction expects at a constant pool index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedKind {
    Class,
    Field,
    /// A `MethodRef`, as used by `invokevirtual`
    Method,
    /// An `InterfaceMethodRef`, as used by `invokeinterface`
    InterfaceMethod,
    /// Either kind of method reference, as used by `invokestatic` and `invokespecial`
    AnyMethod,
}

#[derive(Debug, Default)]
struct CacheSlot {
    value: OnceLock<ResolvedSymbol>,
    /// Held while resolving, so only one thread does the work for a slot
    lock: Mutex<()>,
}

/// The resolved entries of a class's constant pool.
/// Entries are filled on their first successful resolution and never change afterwards.
#[derive(Debug)]
pub struct ConstantPoolCache {
    slots: Vec<CacheSlot>,
}
impl ConstantPoolCache {
    pub(crate) fn new(count: usize) -> ConstantPoolCache {
        ConstantPoolCache {
            slots: (0..count).map(|_| CacheSlot::default()).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, index: ConstantPoolIndex) -> Option<ResolvedSymbol> {
        self.slots
            .get(usize::from(index.0))
            .and_then(|slot| slot.value.get())
            .copied()
    }

    /// The number of entries that have been resolved
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value.get().is_some())
            .count()
    }
}

/// The access level of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
    Package,
    Private,
}
impl Visibility {
    #[must_use]
    pub fn of_method(flags: MethodAccessFlags) -> Visibility {
        if flags.contains(MethodAccessFlags::PUBLIC) {
            Visibility::Public
        } else if flags.contains(MethodAccessFlags::PROTECTED) {
            Visibility::Protected
        } else if flags.contains(MethodAccessFlags::PRIVATE) {
            Visibility::Private
        } else {
            Visibility::Package
        }
    }

    #[must_use]
    pub fn of_field(flags: FieldAccessFlags) -> Visibility {
        if flags.contains(FieldAccessFlags::PUBLIC) {
            Visibility::Public
        } else if flags.contains(FieldAccessFlags::PROTECTED) {
            Visibility::Protected
        } else if flags.contains(FieldAccessFlags::PRIVATE) {
            Visibility::Private
        } else {
            Visibility::Package
        }
    }
}

impl Classes {
    /// Resolve the symbolic reference at `index` in the constant pool of `class`.
    /// The result is cached in the class's constant pool cache. Failures are not cached, so a
    /// later attempt will try again.
    pub fn resolve(
        &self,
        class: &Arc<Class>,
        index: ConstantPoolIndex,
        expected: ExpectedKind,
    ) -> Result<ResolvedSymbol, LinkageError> {
        let info = class.class_file_info().ok_or_else(|| LinkageError::ClassFormat {
            class: class.name.to_string(),
            source: ClassFormatErrorKind::ConstantIndexOutOfBounds { index: index.0 }.into(),
        })?;
        let pool = &info.constant_pool;

        // The tag is checked even on cache hits, since the same slot may be reached from
        // instructions expecting different kinds
        let entry = pool.get(index).map_err(|source| LinkageError::ClassFormat {
            class: class.name.to_string(),
            source,
        })?;
        let tag_matches = match expected {
            ExpectedKind::Class => entry.tag() == ConstantTag::Class,
            ExpectedKind::Field => entry.tag() == ConstantTag::FieldRef,
            ExpectedKind::Method => entry.tag() == ConstantTag::MethodRef,
            ExpectedKind::InterfaceMethod => entry.tag() == ConstantTag::InterfaceMethodRef,
            ExpectedKind::AnyMethod => matches!(
                entry.tag(),
                ConstantTag::MethodRef | ConstantTag::InterfaceMethodRef
            ),
        };
        if !tag_matches {
            let expected_tag = match expected {
                ExpectedKind::Class => ConstantTag::Class,
                ExpectedKind::Field => ConstantTag::FieldRef,
                ExpectedKind::Method | ExpectedKind::AnyMethod => ConstantTag::MethodRef,
                ExpectedKind::InterfaceMethod => ConstantTag::InterfaceMethodRef,
            };
            return Err(LinkageError::ClassFormat {
                class: class.name.to_string(),
                source: ClassFormatErrorKind::ConstantTagMismatch {
                    index: index.0,
                    expected: expected_tag,
                    found: entry.tag(),
                }
                .into(),
            });
        }

        let slot = &info.constant_cache.slots[usize::from(index.0)];
        if let Some(value) = slot.value.get() {
            return Ok(*value);
        }

        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Someone else may have finished while we waited for the lock
        if let Some(value) = slot.value.get() {
            return Ok(*value);
        }

        let value = self.resolve_entry(class, entry)?;
        tracing::trace!("Resolved {}#{} to {:?}", class.name, index.0, value);
        // We hold the lock, so nobody else can have set it
        let _ = slot.value.set(value);
        Ok(value)
    }

    /// Resolve a class constant, returning the loaded class
    pub fn resolve_class(
        &self,
        class: &Arc<Class>,
        index: ConstantPoolIndex,
    ) -> Result<Arc<Class>, LinkageError> {
        match self.resolve(class, index, ExpectedKind::Class)? {
            ResolvedSymbol::Class(id) => self
                .get(id)
                .ok_or_else(|| LinkageError::NoClassDefFound(self.names().tpath(id))),
            other => Err(LinkageError::IncompatibleClassChange(format!(
                "class constant #{} of {} resolved to {:?}",
                index.0, class.name, other
            ))),
        }
    }

    fn resolve_entry(
        &self,
        class: &Arc<Class>,
        entry: &ConstantPoolEntry,
    ) -> Result<ResolvedSymbol, LinkageError> {
        let pool = class
            .constant_pool()
            .ok_or_else(|| LinkageError::NoClassDefFound(class.name.to_string()))?;
        let class_format = |source| LinkageError::ClassFormat {
            class: class.name.to_string(),
            source,
        };

        match entry {
            ConstantPoolEntry::Class { name_index } => {
                let name = pool.utf8(*name_index).map_err(class_format)?;
                self.resolve_class_name(class, name)
                    .map(|target| ResolvedSymbol::Class(target.id))
            }
            ConstantPoolEntry::FieldRef(member) => {
                let target = self.resolve_class(class, member.class_index)?;
                let (name, descriptor) = pool
                    .name_and_type(member.name_and_type_index)
                    .map_err(class_format)?;
                self.resolve_field(class, &target, name, descriptor)
                    .map(ResolvedSymbol::Field)
            }
            ConstantPoolEntry::MethodRef(member) => {
                let target = self.resolve_class(class, member.class_index)?;
                let (name, descriptor) = pool
                    .name_and_type(member.name_and_type_index)
                    .map_err(class_format)?;
                self.resolve_class_method(class, &target, name, descriptor)
                    .map(ResolvedSymbol::Method)
            }
            ConstantPoolEntry::InterfaceMethodRef(member) => {
                let target = self.resolve_class(class, member.class_index)?;
                let (name, descriptor) = pool
                    .name_and_type(member.name_and_type_index)
                    .map_err(class_format)?;
                self.resolve_interface_method(class, &target, name, descriptor)
                    .map(ResolvedSymbol::Method)
            }
            _ => Err(class_format(
                ClassFormatErrorKind::MalformedAttribute {
                    attribute: "constant pool",
                    reason: "entry is not a symbolic reference",
                }
                .into(),
            )),
        }
    }

    /// Load the class named by a constant and check that `accessor` may access it
    pub fn resolve_class_name(
        &self,
        accessor: &Class,
        name: &str,
    ) -> Result<Arc<Class>, LinkageError> {
        let target = self.get_or_load(name)?;

        // Access to arrays is decided by their element class
        let mut element = Arc::clone(&target);
        while let Some(component_id) = element.array().and_then(|array| array.component_id) {
            element = self
                .get(component_id)
                .ok_or_else(|| LinkageError::NoClassDefFound(self.names().tpath(component_id)))?;
        }

        if !self.can_access_class(accessor, &element) {
            return Err(LinkageError::IllegalAccess(format!(
                "tried to access class {} from class {}",
                target.name, accessor.name
            )));
        }

        Ok(target)
    }

    #[must_use]
    pub fn can_access_class(&self, accessor: &Class, target: &Class) -> bool {
        target.is_public() || accessor.package == target.package
    }

    /// Whether `accessor` may access a member with the given visibility declared in `declaring`
    #[must_use]
    pub fn can_access_member(
        &self,
        accessor: &Class,
        declaring: &Class,
        visibility: Visibility,
    ) -> bool {
        match visibility {
            Visibility::Public => true,
            Visibility::Protected => {
                accessor.package == declaring.package
                    || self.is_same_or_subclass(accessor.id, declaring.id)
            }
            Visibility::Package => accessor.package == declaring.package,
            Visibility::Private => accessor.id == declaring.id,
        }
    }

    /// Resolve a field: the class itself, then its superinterfaces, then its superclass
    pub fn resolve_field(
        &self,
        accessor: &Class,
        target: &Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldId, LinkageError> {
        let (declaring, field_id) = self
            .lookup_field(target, name, descriptor)
            .ok_or_else(|| {
                LinkageError::NoSuchField(util::format_field(&target.name, name, descriptor))
            })?;

        let (_, index) = field_id.decompose();
        let flags = declaring
            .field(index)
            .map_or_else(FieldAccessFlags::empty, |field| field.access_flags);
        if !self.can_access_member(accessor, &declaring, Visibility::of_field(flags)) {
            return Err(LinkageError::IllegalAccess(format!(
                "class {} tried to access field {}",
                accessor.name,
                util::format_field(&declaring.name, name, descriptor)
            )));
        }

        Ok(field_id)
    }

    fn lookup_field(
        &self,
        class: &Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Option<(Arc<Class>, FieldId)> {
        if let Some(field) = class.find_field(name, descriptor) {
            return Some((Arc::clone(class), field.id));
        }

        for interface_id in &class.interfaces {
            if let Some(interface) = self.get(*interface_id) {
                if let Some(found) = self.lookup_field(&interface, name, descriptor) {
                    return Some(found);
                }
            }
        }

        class
            .super_class
            .and_then(|id| self.get(id))
            .and_then(|super_class| self.lookup_field(&super_class, name, descriptor))
    }

    /// Resolve a method referenced through a `MethodRef`.
    /// The class is searched along with its superclasses, and then the maximally-specific
    /// superinterface methods.
    pub fn resolve_class_method(
        &self,
        accessor: &Class,
        target: &Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodId, LinkageError> {
        if target.is_interface() {
            return Err(LinkageError::IncompatibleClassChange(format!(
                "Found interface {}, but class was expected",
                target.name
            )));
        }

        let method_id = self
            .find_method_in_chain(Arc::clone(target), name, descriptor)
            .or_else(|| self.pick_maximally_specific(target, name, descriptor))
            .ok_or_else(|| {
                LinkageError::NoSuchMethod(util::format_method(&target.name, name, descriptor))
            })?;

        self.check_method_access(accessor, method_id)?;
        Ok(method_id)
    }

    /// Resolve a method referenced through an `InterfaceMethodRef`.
    /// The interface is searched, then the public instance methods of `java/lang/Object`, then
    /// the maximally-specific superinterface methods.
    pub fn resolve_interface_method(
        &self,
        accessor: &Class,
        target: &Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodId, LinkageError> {
        if !target.is_interface() {
            return Err(LinkageError::IncompatibleClassChange(format!(
                "Found class {}, but interface was expected",
                target.name
            )));
        }

        let found = target.find_method(name, descriptor).map(|method| method.id);
        let found = match found {
            Some(found) => Some(found),
            None => {
                let object = self.get_or_load(OBJECT_NAME)?;
                object
                    .find_method(name, descriptor)
                    .filter(|method| {
                        method.access_flags.contains(MethodAccessFlags::PUBLIC)
                            && !method.is_static()
                    })
                    .map(|method| method.id)
            }
        };
        let method_id = found
            .or_else(|| self.pick_maximally_specific(target, name, descriptor))
            .ok_or_else(|| {
                LinkageError::NoSuchMethod(util::format_method(&target.name, name, descriptor))
            })?;

        self.check_method_access(accessor, method_id)?;
        Ok(method_id)
    }

    /// Choose among the maximally-specific superinterface methods: the non-abstract one if
    /// there is exactly one, otherwise any of them
    fn pick_maximally_specific(
        &self,
        class: &Class,
        name: &str,
        descriptor: &str,
    ) -> Option<MethodId> {
        let candidates = default_methods::maximally_specific(self, class, name, descriptor);
        let non_abstract: Vec<MethodId> = candidates
            .iter()
            .filter(|candidate| !candidate.is_abstract)
            .map(|candidate| candidate.method)
            .collect();
        if non_abstract.len() == 1 {
            Some(non_abstract[0])
        } else {
            candidates.first().map(|candidate| candidate.method)
        }
    }

    fn check_method_access(&self, accessor: &Class, method_id: MethodId) -> Result<(), LinkageError> {
        let declaring = self
            .get(method_id.class_id())
            .ok_or_else(|| LinkageError::NoClassDefFound(self.names().tpath(method_id.class_id())))?;
        let (_, index) = method_id.decompose();
        let method = declaring
            .method(index)
            .ok_or_else(|| LinkageError::NoSuchMethod(self.method_path(method_id)))?;

        if self.can_access_member(accessor, &declaring, Visibility::of_method(method.access_flags))
        {
            Ok(())
        } else {
            Err(LinkageError::IllegalAccess(format!(
                "class {} tried to access method {}",
                accessor.name,
                util::format_method(&declaring.name, &method.name, &method.descriptor)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use basalt_classfile::{
        builder::{ClassBuilder, Code},
        opcode, ConstantPoolIndex, FieldAccessFlags, MethodAccessFlags,
    };

    use super::{ExpectedKind, ResolvedSymbol};
    use crate::{test_util::classes_with, LinkageError};

    fn returning() -> Code {
        let mut code = Code::new(0, 1);
        code.op(opcode::RETURN);
        code
    }

    /// A class `User` referencing the given members, with the pool indices of the references
    fn user_with(refs: impl FnOnce(&mut ClassBuilder) -> Vec<u16>) -> (Vec<u8>, Vec<u16>) {
        let mut user = ClassBuilder::new("User");
        let indices = refs(&mut user);
        (user.build(), indices)
    }

    #[test]
    fn test_resolve_field_through_hierarchy() {
        let mut i = ClassBuilder::interface("I");
        i.field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
            "CONST",
            "I",
        );
        let mut base = ClassBuilder::new("Base");
        base.field(FieldAccessFlags::PUBLIC, "x", "J");
        let derived = ClassBuilder::new("Derived")
            .with_super(Some("Base"))
            .implements("I")
            .clone()
            .build();
        let (user, refs) = user_with(|user| {
            vec![
                user.pool().field_ref("Derived", "x", "J"),
                user.pool().field_ref("Derived", "CONST", "I"),
                user.pool().field_ref("Derived", "missing", "I"),
            ]
        });
        let classes = classes_with(vec![
            ("I", i.build()),
            ("Base", base.build()),
            ("Derived", derived),
            ("User", user),
        ]);
        let user = classes.get_or_load("User").unwrap();
        let base = classes.get_or_load("Base").unwrap();
        let i = classes.get_or_load("I").unwrap();

        match classes.resolve(&user, ConstantPoolIndex(refs[0]), ExpectedKind::Field) {
            Ok(ResolvedSymbol::Field(id)) => assert_eq!(id.decompose().0, base.id()),
            other => panic!("Unexpected {:?}", other),
        }
        match classes.resolve(&user, ConstantPoolIndex(refs[1]), ExpectedKind::Field) {
            Ok(ResolvedSymbol::Field(id)) => assert_eq!(id.decompose().0, i.id()),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(matches!(
            classes.resolve(&user, ConstantPoolIndex(refs[2]), ExpectedKind::Field),
            Err(LinkageError::NoSuchField(_))
        ));
    }

    #[test]
    fn test_resolve_tag_mismatch() {
        let (user, refs) = user_with(|user| vec![user.pool().field_ref("User", "x", "I")]);
        let classes = classes_with(vec![("User", user)]);
        let user = classes.get_or_load("User").unwrap();
        assert!(matches!(
            classes.resolve(&user, ConstantPoolIndex(refs[0]), ExpectedKind::Method),
            Err(LinkageError::ClassFormat { .. })
        ));
    }

    #[test]
    fn test_resolve_method_kinds() {
        let mut i = ClassBuilder::interface("I");
        i.method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            "run",
            "()V",
            None,
        );
        let mut a = ClassBuilder::new("A");
        a.method(MethodAccessFlags::PUBLIC, "go", "()V", Some(returning()));
        let (user, refs) = user_with(|user| {
            vec![
                user.pool().method_ref("A", "go", "()V"),
                user.pool().method_ref("I", "run", "()V"),
                user.pool().interface_method_ref("A", "go", "()V"),
                user.pool().interface_method_ref("I", "run", "()V"),
                user.pool().interface_method_ref("I", "hashCode", "()I"),
                user.pool().method_ref("A", "nope", "()V"),
            ]
        });
        let classes = classes_with(vec![("I", i.build()), ("A", a.build()), ("User", user)]);
        let user = classes.get_or_load("User").unwrap();
        let resolve = |i: usize, kind| classes.resolve(&user, ConstantPoolIndex(refs[i]), kind);

        assert!(matches!(
            resolve(0, ExpectedKind::Method),
            Ok(ResolvedSymbol::Method(_))
        ));
        assert!(matches!(
            resolve(1, ExpectedKind::Method),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            resolve(2, ExpectedKind::InterfaceMethod),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            resolve(3, ExpectedKind::AnyMethod),
            Ok(ResolvedSymbol::Method(_))
        ));
        let object = classes.get_or_load("java/lang/Object").unwrap();
        match resolve(4, ExpectedKind::InterfaceMethod) {
            Ok(ResolvedSymbol::Method(id)) => assert_eq!(id.class_id(), object.id()),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(matches!(
            resolve(5, ExpectedKind::Method),
            Err(LinkageError::NoSuchMethod(_))
        ));
    }

    #[test]
    fn test_resolve_access_control() {
        let mut secret = ClassBuilder::new("p/Secret");
        secret.method(MethodAccessFlags::PRIVATE, "hidden", "()V", Some(returning()));
        secret.method(MethodAccessFlags::empty(), "local", "()V", Some(returning()));
        let mut package_class = ClassBuilder::new("p/Package");
        package_class.flags(basalt_classfile::ClassAccessFlags::SUPER);
        let (user, refs) = user_with(|user| {
            vec![
                user.pool().method_ref("p/Secret", "hidden", "()V"),
                user.pool().method_ref("p/Secret", "local", "()V"),
                user.pool().class("p/Package"),
                user.pool().class("[Lp/Package;"),
            ]
        });
        let classes = classes_with(vec![
            ("p/Secret", secret.build()),
            ("p/Package", package_class.build()),
            ("User", user),
        ]);
        let user = classes.get_or_load("User").unwrap();
        for (i, kind) in [
            ExpectedKind::Method,
            ExpectedKind::Method,
            ExpectedKind::Class,
            ExpectedKind::Class,
        ]
        .into_iter()
        .enumerate()
        {
            assert!(matches!(
                classes.resolve(&user, ConstantPoolIndex(refs[i]), kind),
                Err(LinkageError::IllegalAccess(_))
            ));
        }
    }

    #[test]
    fn test_resolution_is_cached() {
        let (user, refs) = user_with(|user| vec![user.pool().class("java/lang/Object")]);
        let classes = classes_with(vec![("User", user)]);
        let user = classes.get_or_load("User").unwrap();
        let info = user.class_file_info().unwrap();
        assert_eq!(info.constant_cache().resolved_count(), 0);
        let first = classes
            .resolve(&user, ConstantPoolIndex(refs[0]), ExpectedKind::Class)
            .unwrap();
        assert_eq!(info.constant_cache().get(ConstantPoolIndex(refs[0])), Some(first));
        assert_eq!(info.constant_cache().resolved_count(), 1);
    }

    #[test]
    fn test_concurrent_resolution() {
        let mut target = ClassBuilder::new("Target");
        target.method(MethodAccessFlags::PUBLIC, "go", "()V", Some(returning()));
        let (user, refs) = user_with(|user| vec![user.pool().method_ref("Target", "go", "()V")]);
        let classes = Arc::new(classes_with(vec![("Target", target.build()), ("User", user)]));
        let user = classes.get_or_load("User").unwrap();
        let index = ConstantPoolIndex(refs[0]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let classes = Arc::clone(&classes);
                let user = Arc::clone(&user);
                std::thread::spawn(move || {
                    classes
                        .resolve(&user, index, ExpectedKind::Method)
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|result| *result == results[0]));
    }

    #[test]
    fn test_failure_not_cached() {
        let (user, refs) = user_with(|user| vec![user.pool().class("Later")]);
        let classes = classes_with(vec![("User", user)]);
        let user = classes.get_or_load("User").unwrap();
        let index = ConstantPoolIndex(refs[0]);
        assert!(classes.resolve(&user, index, ExpectedKind::Class).is_err());
        assert_eq!(user.class_file_info().unwrap().constant_cache().get(index), None);
    }
}
