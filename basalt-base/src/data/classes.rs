use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    thread::{self, ThreadId},
};

use basalt_classfile::{names, ClassAccessFlags, FieldType};
use indexmap::IndexSet;

use crate::{
    class::{ArrayClass, Class, ClassFileInfo, ClassVariant, Field, Method},
    default_methods::DefaultMethods,
    id::{self, ClassId, FieldId, MethodId},
    package::Packages,
    resolve::ConstantPoolCache,
    util::{self, ARRAY_INTERFACE_NAMES},
    ClassFileLoader, ClassNames, Config, LinkageError, OBJECT_NAME,
};

type ClassIdMap<V> =
    HashMap<ClassId, V, <util::HashWrapper as util::HashWrapperTrait<ClassId>>::HashMapHasher>;

#[derive(Debug, Clone)]
enum LoadSlot {
    /// The class is being loaded by the given thread
    Loading(ThreadId),
    Loaded(Arc<Class>),
    /// Loading failed. The failure is remembered so every later request sees the same error.
    Failed(LinkageError),
}

/// The registry of loaded classes.
/// Each class name has a slot which the first requesting thread fills. Other threads asking for
/// the same class wait for it to be published.
pub struct Classes {
    config: Config,
    names: ClassNames,
    packages: Mutex<Packages>,
    loader: Box<dyn ClassFileLoader>,
    slots: Mutex<ClassIdMap<LoadSlot>>,
    /// The slot each thread is blocked on. Only accessed while holding `slots`.
    waiting: Mutex<HashMap<ThreadId, ClassId>>,
    slot_published: Condvar,
    pub(crate) default_methods: DefaultMethods,
}
impl Classes {
    #[must_use]
    pub fn new(config: Config, loader: Box<dyn ClassFileLoader>) -> Classes {
        Classes {
            config,
            names: ClassNames::new(),
            packages: Mutex::new(Packages::default()),
            loader,
            slots: Mutex::new(ClassIdMap::default()),
            waiting: Mutex::new(HashMap::new()),
            slot_published: Condvar::new(),
            default_methods: DefaultMethods::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn names(&self) -> &ClassNames {
        &self.names
    }

    #[must_use]
    pub fn package_name(&self, class: &Class) -> String {
        self.packages()
            .name(class.package)
            .unwrap_or_default()
            .to_owned()
    }

    fn packages(&self) -> MutexGuard<'_, Packages> {
        self.packages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, ClassIdMap<LoadSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn waiting(&self) -> MutexGuard<'_, HashMap<ThreadId, ClassId>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether waiting for `owner` would wait on the current thread.
    /// Follows the slot each owner is blocked on to that slot's owner.
    fn waits_on_current(
        &self,
        slots: &ClassIdMap<LoadSlot>,
        mut owner: ThreadId,
        current: ThreadId,
    ) -> bool {
        let waiting = self.waiting();
        // Each step visits a distinct waiting thread unless there is a cycle without us
        for _ in 0..=waiting.len() {
            if owner == current {
                return true;
            }
            match waiting.get(&owner).and_then(|id| slots.get(id)) {
                Some(LoadSlot::Loading(next)) => owner = *next,
                _ => return false,
            }
        }
        false
    }

    /// Get the class if it has already been loaded
    #[must_use]
    pub fn get(&self, id: ClassId) -> Option<Arc<Class>> {
        match self.slots().get(&id) {
            Some(LoadSlot::Loaded(class)) => Some(Arc::clone(class)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_loaded(&self, id: ClassId) -> bool {
        self.get(id).is_some()
    }

    /// Every successfully loaded class, in order of id
    #[must_use]
    pub fn loaded_classes(&self) -> Vec<Arc<Class>> {
        let mut classes: Vec<Arc<Class>> = self
            .slots()
            .values()
            .filter_map(|slot| match slot {
                LoadSlot::Loaded(class) => Some(Arc::clone(class)),
                _ => None,
            })
            .collect();
        classes.sort_by_key(|class| class.id);
        classes
    }

    /// The names of classes whose loading failed, along with the error
    #[must_use]
    pub fn failed_classes(&self) -> Vec<(ClassId, LinkageError)> {
        let mut failed: Vec<(ClassId, LinkageError)> = self
            .slots()
            .iter()
            .filter_map(|(id, slot)| match slot {
                LoadSlot::Failed(err) => Some((*id, err.clone())),
                _ => None,
            })
            .collect();
        failed.sort_by_key(|(id, _)| *id);
        failed
    }

    pub fn get_or_load(&self, name: &str) -> Result<Arc<Class>, LinkageError> {
        let id = self.names.gcid_from_str(name);
        self.get_or_load_id(id)
    }

    /// Load the class with the given id, waiting if another thread is already loading it.
    pub fn get_or_load_id(&self, id: ClassId) -> Result<Arc<Class>, LinkageError> {
        let current = thread::current().id();
        let mut slots = self.slots();
        loop {
            match slots.get(&id) {
                Some(LoadSlot::Loaded(class)) => return Ok(Arc::clone(class)),
                Some(LoadSlot::Failed(err)) => return Err(err.clone()),
                Some(LoadSlot::Loading(owner)) if *owner == current => {
                    // We can only reach our own slot again through the supertypes of the class
                    return Err(LinkageError::ClassCircularity(self.names.tpath(id)));
                }
                Some(LoadSlot::Loading(owner)) => {
                    // The owner is, through other loads, waiting for a class we are loading
                    if self.waits_on_current(&slots, *owner, current) {
                        return Err(LinkageError::ClassCircularity(self.names.tpath(id)));
                    }

                    self.waiting().insert(current, id);
                    slots = self
                        .slot_published
                        .wait(slots)
                        .unwrap_or_else(PoisonError::into_inner);
                    self.waiting().remove(&current);
                }
                None => break,
            }
        }
        slots.insert(id, LoadSlot::Loading(current));
        drop(slots);

        let result = self.create_class(id).map(Arc::new);

        let slot = match &result {
            Ok(class) => LoadSlot::Loaded(Arc::clone(class)),
            Err(err) => {
                tracing::warn!("Failed to load class {}: {}", self.names.tpath(id), err);
                LoadSlot::Failed(err.clone())
            }
        };
        self.slots().insert(id, slot);
        self.slot_published.notify_all();

        result
    }

    fn create_class(&self, id: ClassId) -> Result<Class, LinkageError> {
        let name = self
            .names
            .name(id)
            .ok_or_else(|| LinkageError::NoClassDefFound(self.names.tpath(id)))?;

        let class = if id::is_array_class(&name) {
            self.create_array_class(id, name)?
        } else {
            self.create_normal_class(id, name)?
        };

        if self.config.log_load {
            tracing::info!("Loaded class {}", class.name);
        }

        Ok(class)
    }

    fn create_array_class(&self, id: ClassId, name: Arc<str>) -> Result<Class, LinkageError> {
        let component = match FieldType::parse(&name) {
            Ok(FieldType::Array(component)) => *component,
            _ => return Err(LinkageError::NoClassDefFound(name.to_string())),
        };

        let object = self.get_or_load(OBJECT_NAME)?;

        let (component_id, access_flags, package) = if let Some(component_name) =
            component.class_name()
        {
            let component_class = self.get_or_load(&component_name)?;
            // Arrays are as accessible as their element type
            let flags = (component_class.access_flags & ClassAccessFlags::PUBLIC)
                | ClassAccessFlags::FINAL
                | ClassAccessFlags::ABSTRACT;
            (
                Some(component_class.id),
                flags,
                component_class.package,
            )
        } else {
            let package = self.packages().slice_path_create_if_needed("java/lang");
            (
                None,
                ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT,
                package,
            )
        };

        Ok(Class {
            id,
            name,
            package,
            access_flags,
            super_class: Some(object.id),
            interfaces: Vec::new(),
            all_interfaces: IndexSet::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            variant: ClassVariant::Array(ArrayClass {
                component,
                component_id,
            }),
        })
    }

    fn create_normal_class(&self, id: ClassId, name: Arc<str>) -> Result<Class, LinkageError> {
        let data = self
            .loader
            .load_class_file(&name)
            .map_err(|err| LinkageError::NoClassDefFound(format!("{}: {}", name, err)))?
            .ok_or_else(|| LinkageError::NoClassDefFound(name.to_string()))?;

        let class_format = |source| LinkageError::ClassFormat {
            class: name.to_string(),
            source,
        };

        let mut class_file = basalt_classfile::parse(&data).map_err(class_format)?;

        let this_name = class_file.this_class_name().map_err(class_format)?;
        if this_name != &*name {
            return Err(LinkageError::NoClassDefFound(format!(
                "{} (wrong name: {})",
                name, this_name
            )));
        }

        let package = self
            .packages()
            .slice_path_create_if_needed(names::package_of(&name));
        let is_interface = class_file.is_interface();

        let super_class = if let Some(super_name) =
            class_file.super_class_name().map_err(class_format)?
        {
            let super_class = self.get_or_load(super_name)?;
            if super_class.is_interface() {
                return Err(LinkageError::IncompatibleClassChange(format!(
                    "class {} has interface {} as super class",
                    name, super_class.name
                )));
            }
            if super_class
                .access_flags
                .contains(ClassAccessFlags::FINAL)
            {
                return Err(LinkageError::Verify(format!(
                    "Cannot inherit from final class {}",
                    super_class.name
                )));
            }
            if !super_class.is_public() && super_class.package != package {
                return Err(LinkageError::IllegalAccess(format!(
                    "class {} cannot access its superclass {}",
                    name, super_class.name
                )));
            }
            Some(super_class)
        } else {
            None
        };

        let mut interfaces = Vec::new();
        let mut all_interfaces = IndexSet::new();
        for interface_name in class_file.interface_names().map_err(class_format)? {
            let interface = self.get_or_load(interface_name)?;
            if !interface.is_interface() {
                return Err(LinkageError::IncompatibleClassChange(format!(
                    "class {} can not implement {}, because it is not an interface",
                    name, interface.name
                )));
            }
            if !interface.is_public() && interface.package != package {
                return Err(LinkageError::IllegalAccess(format!(
                    "class {} cannot access its superinterface {}",
                    name, interface.name
                )));
            }
            interfaces.push(interface.id);
            all_interfaces.insert(interface.id);
            all_interfaces.extend(interface.all_interfaces.iter().copied());
        }
        if let Some(super_class) = &super_class {
            all_interfaces.extend(super_class.all_interfaces.iter().copied());
        }

        let methods = std::mem::take(&mut class_file.methods)
            .into_iter()
            .enumerate()
            .map(|(index, method)| Method {
                id: MethodId::unchecked_compose(id, index as u16),
                name: method.name,
                descriptor: method.descriptor,
                parsed_descriptor: method.parsed_descriptor,
                access_flags: method.access_flags,
                code: method.code,
                decoded: OnceLock::new(),
            })
            .collect();
        let fields = std::mem::take(&mut class_file.fields)
            .into_iter()
            .enumerate()
            .map(|(index, field)| Field {
                id: FieldId::unchecked_compose(id, index as u16),
                name: field.name,
                descriptor: field.descriptor,
                field_type: field.field_type,
                access_flags: field.access_flags,
            })
            .collect();

        if is_interface {
            tracing::trace!("{} is an interface", name);
        }

        let constant_cache = ConstantPoolCache::new(class_file.constant_pool.count());
        Ok(Class {
            id,
            name,
            package,
            access_flags: class_file.access_flags,
            super_class: super_class.map(|class| class.id),
            interfaces,
            all_interfaces,
            methods,
            fields,
            variant: ClassVariant::Class(ClassFileInfo {
                version: class_file.version,
                constant_pool: class_file.constant_pool,
                constant_cache,
            }),
        })
    }

    /// Iterate over the class and its superclasses, starting with the class itself.
    /// Every superclass of a loaded class is loaded.
    pub fn super_chain(&self, class: Arc<Class>) -> impl Iterator<Item = Arc<Class>> + '_ {
        std::iter::successors(Some(class), move |class| {
            class.super_class.and_then(|id| self.get(id))
        })
    }

    /// Whether `class` is `target` or a subclass of it.
    /// Both must be loaded.
    #[must_use]
    pub fn is_same_or_subclass(&self, class: ClassId, target: ClassId) -> bool {
        match self.get(class) {
            Some(class) => self.super_chain(class).any(|class| class.id == target),
            None => false,
        }
    }

    /// Whether a value of class `from` can be assigned to a variable of type `to`, by the rules
    /// of `checkcast`.
    /// Both must be loaded.
    #[must_use]
    pub fn is_assignable(&self, from: ClassId, to: ClassId) -> bool {
        if from == to {
            return true;
        }

        let (from, to) = match (self.get(from), self.get(to)) {
            (Some(from), Some(to)) => (from, to),
            _ => return false,
        };

        if let Some(from_array) = from.array() {
            if let Some(to_array) = to.array() {
                return match (from_array.component_id, to_array.component_id) {
                    (Some(from_component), Some(to_component)) => {
                        self.is_assignable(from_component, to_component)
                    }
                    (None, None) => from_array.component == to_array.component,
                    _ => false,
                };
            }

            return &*to.name == OBJECT_NAME || ARRAY_INTERFACE_NAMES.contains(&&*to.name);
        }

        if to.is_array() {
            return false;
        }

        if to.is_interface() {
            return from.id == to.id || from.all_interfaces.contains(&to.id);
        }

        self.super_chain(from).any(|class| class.id == to.id)
    }

    /// The first class in the superclass chain of `left` which `right` also inherits from.
    /// Both must be loaded.
    #[must_use]
    pub fn first_common_super_class(&self, left: ClassId, right: ClassId) -> Option<ClassId> {
        let right_chain: IndexSet<ClassId> = self
            .get(right)
            .map(|class| self.super_chain(class).map(|class| class.id).collect())
            .unwrap_or_default();
        let left = self.get(left)?;
        self.super_chain(left)
            .map(|class| class.id)
            .find(|id| right_chain.contains(id))
    }

    /// Find the method in the class or its superclasses
    #[must_use]
    pub fn find_method_in_chain(
        &self,
        class: Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Option<MethodId> {
        self.super_chain(class)
            .find_map(|class| class.find_method(name, descriptor).map(Method::id))
    }

    /// Run `f` with the method the id refers to
    pub fn with_method<R>(&self, id: MethodId, f: impl FnOnce(&Class, &Method) -> R) -> Option<R> {
        let (class_id, index) = id.decompose();
        let class = self.get(class_id)?;
        let method = class.method(index)?;
        Some(f(&class, method))
    }

    /// Format a method id for messages, like `java/lang/Object.hashCode()I`
    #[must_use]
    pub fn method_path(&self, id: MethodId) -> String {
        self.with_method(id, |class, method| {
            util::format_method(&class.name, &method.name, &method.descriptor)
        })
        .unwrap_or_else(|| format!("{:?}", id))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{mpsc, Arc, Barrier},
        time::Duration,
    };

    use basalt_classfile::{builder::ClassBuilder, ClassAccessFlags};

    use crate::{
        test_util::{classes_with, object_class},
        ClassFileLoader, Classes, Config, LinkageError, LoadClassFileError,
    };

    /// Holds back the class files of `gated` until that many loads have asked for them, so
    /// each is being loaded by its own thread before any supertypes are requested
    struct GatedLoader {
        files: HashMap<String, Vec<u8>>,
        gated: Vec<String>,
        barrier: Barrier,
    }
    impl ClassFileLoader for GatedLoader {
        fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
            if self.gated.iter().any(|gated| gated == name) {
                self.barrier.wait();
            }
            Ok(self.files.get(name).cloned())
        }
    }

    #[test]
    fn test_load_and_memoize() {
        let classes = classes_with(vec![("A", ClassBuilder::new("A").build())]);
        let a = classes.get_or_load("A").unwrap();
        let again = classes.get_or_load("A").unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &again));
        assert_eq!(a.name(), "A");
        assert!(classes.is_loaded(a.super_id().unwrap()));
    }

    #[test]
    fn test_missing_class_is_memoized() {
        let classes = classes_with(vec![]);
        let err = classes.get_or_load("Missing").unwrap_err();
        assert_eq!(err, LinkageError::NoClassDefFound("Missing".to_owned()));
        assert_eq!(classes.get_or_load("Missing").unwrap_err(), err);
        assert_eq!(classes.failed_classes().len(), 1);
    }

    #[test]
    fn test_wrong_name() {
        let classes = classes_with(vec![("A", ClassBuilder::new("B").build())]);
        assert!(matches!(
            classes.get_or_load("A"),
            Err(LinkageError::NoClassDefFound(_))
        ));
    }

    #[test]
    fn test_circularity() {
        let a = ClassBuilder::new("A").with_super(Some("B")).build();
        let b = ClassBuilder::new("B").with_super(Some("A")).build();
        let classes = classes_with(vec![("A", a), ("B", b)]);
        let err = classes.get_or_load("A").unwrap_err();
        assert!(matches!(err, LinkageError::ClassCircularity(_)));
        assert_eq!(err.java_class_name(), "java/lang/ClassCircularityError");
    }

    #[test]
    fn test_circularity_across_threads() {
        let mut files = HashMap::new();
        files.insert("java/lang/Object".to_owned(), object_class());
        files.insert(
            "A".to_owned(),
            ClassBuilder::new("A").with_super(Some("B")).build(),
        );
        files.insert(
            "B".to_owned(),
            ClassBuilder::new("B").with_super(Some("A")).build(),
        );
        let loader = GatedLoader {
            files,
            gated: vec!["A".to_owned(), "B".to_owned()],
            barrier: Barrier::new(2),
        };
        let classes = Arc::new(Classes::new(Config::default(), Box::new(loader)));
        // Object is loaded up front so both threads only contend on A and B
        classes.get_or_load("java/lang/Object").unwrap();

        let (sender, receiver) = mpsc::channel();
        for name in ["A", "B"] {
            let classes = Arc::clone(&classes);
            let sender = sender.clone();
            std::thread::spawn(move || {
                let result = classes.get_or_load(name);
                sender.send((name, result)).unwrap();
            });
        }

        for _ in 0..2 {
            let (name, result) = receiver
                .recv_timeout(Duration::from_secs(5))
                .expect("circular loads on two threads did not finish");
            assert!(
                matches!(result, Err(LinkageError::ClassCircularity(_))),
                "{}: {:?}",
                name,
                result
            );
        }
        assert_eq!(classes.failed_classes().len(), 2);
    }

    #[test]
    fn test_interface_circularity() {
        let i = ClassBuilder::interface("I").implements("J").clone().build();
        let j = ClassBuilder::interface("J").implements("I").clone().build();
        let classes = classes_with(vec![("I", i), ("J", j)]);
        assert!(matches!(
            classes.get_or_load("I"),
            Err(LinkageError::ClassCircularity(_))
        ));
    }

    #[test]
    fn test_bad_supertypes() {
        let i = ClassBuilder::interface("I").build();
        let a = ClassBuilder::new("A").with_super(Some("I")).build();
        let mut f = ClassBuilder::new("F");
        f.flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL);
        let b = ClassBuilder::new("B").with_super(Some("F")).build();
        let c = ClassBuilder::new("C").implements("F").clone().build();
        let classes = classes_with(vec![
            ("I", i),
            ("A", a),
            ("F", f.build()),
            ("B", b),
            ("C", c),
        ]);
        assert!(matches!(
            classes.get_or_load("A"),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            classes.get_or_load("B"),
            Err(LinkageError::Verify(_))
        ));
        assert!(matches!(
            classes.get_or_load("C"),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
    }

    #[test]
    fn test_superclass_access() {
        let mut hidden = ClassBuilder::new("p/Hidden");
        hidden.flags(ClassAccessFlags::SUPER);
        let a = ClassBuilder::new("q/A").with_super(Some("p/Hidden")).build();
        let b = ClassBuilder::new("p/B").with_super(Some("p/Hidden")).build();
        let classes = classes_with(vec![("p/Hidden", hidden.build()), ("q/A", a), ("p/B", b)]);
        assert!(matches!(
            classes.get_or_load("q/A"),
            Err(LinkageError::IllegalAccess(_))
        ));
        assert!(classes.get_or_load("p/B").is_ok());
    }

    #[test]
    fn test_interface_closure_order() {
        let k = ClassBuilder::interface("K").build();
        let j = ClassBuilder::interface("J").implements("K").clone().build();
        let i = ClassBuilder::interface("I").build();
        let a = ClassBuilder::new("A").implements("J").implements("I").clone().build();
        let classes = classes_with(vec![("K", k), ("J", j), ("I", i), ("A", a)]);
        let a = classes.get_or_load("A").unwrap();
        let order: Vec<String> = a
            .all_interfaces()
            .iter()
            .map(|id| classes.names().tpath(*id))
            .collect();
        assert_eq!(order, vec!["J", "K", "I"]);
    }

    #[test]
    fn test_assignability() {
        let i = ClassBuilder::interface("I").build();
        let a = ClassBuilder::new("A").implements("I").clone().build();
        let b = ClassBuilder::new("B").with_super(Some("A")).build();
        let classes = classes_with(vec![("I", i), ("A", a), ("B", b)]);
        let object = classes.get_or_load("java/lang/Object").unwrap().id();
        let i = classes.get_or_load("I").unwrap().id();
        let a = classes.get_or_load("A").unwrap().id();
        let b = classes.get_or_load("B").unwrap().id();
        let b_array = classes.get_or_load("[LB;").unwrap().id();
        let a_array = classes.get_or_load("[LA;").unwrap().id();
        let int_array = classes.get_or_load("[I").unwrap().id();

        assert!(classes.is_assignable(b, a));
        assert!(classes.is_assignable(b, i));
        assert!(classes.is_assignable(b, object));
        assert!(!classes.is_assignable(a, b));
        assert!(classes.is_assignable(b_array, a_array));
        assert!(!classes.is_assignable(a_array, b_array));
        assert!(classes.is_assignable(int_array, object));
        assert!(!classes.is_assignable(int_array, a_array));
        assert_eq!(classes.first_common_super_class(b, a), Some(a));
        assert_eq!(classes.first_common_super_class(i, b), Some(object));
    }
}
