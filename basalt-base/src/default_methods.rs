//! Selection of the method an invocation runs, including default methods inherited from
//! interfaces.
//!
//! A declaration in the receiver class or its superclasses always wins. Otherwise the
//! maximally-specific declarations among the superinterfaces are collected: a candidate is
//! dropped when another candidate is declared in one of its subinterfaces. A single concrete
//! survivor is selected, several are a conflict.
//!
//! Selections are memoized per receiver class and signature. The first thread to ask performs the
//! search while others asking for the same entry wait on it, and the result never changes.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

use itertools::Itertools;

use crate::{
    class::{Class, Method},
    id::{ClassId, MethodId},
    util, Classes, LinkageError,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub name: String,
    pub descriptor: String,
}
impl MethodSignature {
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> MethodSignature {
        MethodSignature {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// The outcome of selecting a method for a receiver class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Declared by the class or one of its superclasses. This may be abstract.
    Class(MethodId),
    /// The single concrete maximally-specific superinterface method
    Default(MethodId),
    /// Several concrete maximally-specific superinterface methods, in hierarchy order
    Conflict(Vec<MethodId>),
    /// Only abstract maximally-specific superinterface methods
    Abstract(Vec<MethodId>),
    /// Nothing declares the method
    Missing,
}

/// The state of a memoized (receiver class, signature) entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultMethodState {
    Unresolved,
    /// A thread is currently performing the search
    Searching,
    Resolved(MethodId),
    Conflicted(Vec<MethodId>),
    Abstract,
    Missing,
}
impl From<&Selection> for DefaultMethodState {
    fn from(selection: &Selection) -> DefaultMethodState {
        match selection {
            Selection::Class(id) | Selection::Default(id) => DefaultMethodState::Resolved(*id),
            Selection::Conflict(ids) => DefaultMethodState::Conflicted(ids.clone()),
            Selection::Abstract(_) => DefaultMethodState::Abstract,
            Selection::Missing => DefaultMethodState::Missing,
        }
    }
}

type SelectionCell = Arc<OnceLock<Selection>>;

#[derive(Debug, Default)]
pub struct DefaultMethods {
    entries: RwLock<HashMap<(ClassId, MethodSignature), SelectionCell>>,
}
impl DefaultMethods {
    fn cell(&self, key: (ClassId, MethodSignature)) -> SelectionCell {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = entries.get(&key) {
                return Arc::clone(cell);
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_default())
    }

    #[must_use]
    pub fn state(&self, receiver: ClassId, signature: &MethodSignature) -> DefaultMethodState {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&(receiver, signature.clone())) {
            None => DefaultMethodState::Unresolved,
            Some(cell) => cell
                .get()
                .map_or(DefaultMethodState::Searching, DefaultMethodState::from),
        }
    }

    /// Every memoized entry with its current state, ordered by class and signature
    #[must_use]
    pub fn entries(&self) -> Vec<(ClassId, MethodSignature, DefaultMethodState)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|((class_id, signature), cell)| {
                let state = cell
                    .get()
                    .map_or(DefaultMethodState::Searching, DefaultMethodState::from);
                (*class_id, signature.clone(), state)
            })
            .sorted_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)))
            .collect()
    }
}

/// A maximally-specific superinterface method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub interface: ClassId,
    pub method: MethodId,
    pub is_abstract: bool,
}

fn is_inheritable(method: &Method) -> bool {
    !method.is_static() && !method.is_private()
}

/// The maximally-specific superinterface methods of `class` for the signature, in the order of
/// [`Class::all_interfaces`]
#[must_use]
pub fn maximally_specific(
    classes: &Classes,
    class: &Class,
    name: &str,
    descriptor: &str,
) -> Vec<Candidate> {
    let candidates: Vec<(Arc<Class>, Candidate)> = class
        .all_interfaces
        .iter()
        .filter_map(|id| classes.get(*id))
        .filter_map(|interface| {
            let method = interface
                .find_method(name, descriptor)
                .filter(|method| is_inheritable(method))?;
            let candidate = Candidate {
                interface: interface.id,
                method: method.id,
                is_abstract: method.is_abstract(),
            };
            Some((interface, candidate))
        })
        .collect();

    candidates
        .iter()
        .filter(|(_, candidate)| {
            // Dropped if some other candidate's interface extends this one
            !candidates.iter().any(|(other, _)| {
                other.id != candidate.interface && other.all_interfaces.contains(&candidate.interface)
            })
        })
        .map(|(_, candidate)| *candidate)
        .collect()
}

fn search(classes: &Classes, receiver: &Arc<Class>, signature: &MethodSignature) -> Selection {
    let declared = classes.super_chain(Arc::clone(receiver)).find_map(|class| {
        class
            .find_method(&signature.name, &signature.descriptor)
            .filter(|method| is_inheritable(method))
            .map(Method::id)
    });
    if let Some(id) = declared {
        return Selection::Class(id);
    }

    let candidates = maximally_specific(classes, receiver, &signature.name, &signature.descriptor);
    let concrete: Vec<MethodId> = candidates
        .iter()
        .filter(|candidate| !candidate.is_abstract)
        .map(|candidate| candidate.method)
        .collect();

    match concrete.len() {
        0 if candidates.is_empty() => Selection::Missing,
        0 => Selection::Abstract(candidates.iter().map(|candidate| candidate.method).collect()),
        1 => Selection::Default(concrete[0]),
        _ => Selection::Conflict(concrete),
    }
}

impl Classes {
    /// Select the method that runs for a receiver of the given class.
    /// For `invokespecial` on an interface method the interface itself is the receiver.
    pub fn select_method(&self, receiver: &Arc<Class>, signature: &MethodSignature) -> Selection {
        let cell = self
            .default_methods
            .cell((receiver.id, signature.clone()));
        if let Some(selection) = cell.get() {
            return selection.clone();
        }

        // Threads arriving while the search runs block here until it is published
        cell.get_or_init(|| {
            let _span = tracing::trace_span!("select_method", class = %receiver.name).entered();
            let selection = search(self, receiver, signature);
            tracing::trace!(
                "Selected {:?} for {}.{}{}",
                selection,
                receiver.name,
                signature.name,
                signature.descriptor
            );
            selection
        })
        .clone()
    }

    /// Select the method to invoke, turning selections that can't run into the error thrown at
    /// the call site
    pub fn select_invocable(
        &self,
        receiver: &Arc<Class>,
        signature: &MethodSignature,
    ) -> Result<MethodId, LinkageError> {
        let abstract_error = || {
            LinkageError::AbstractMethod(format!(
                "Receiver class {} does not define or inherit an implementation of the resolved method {}{}",
                receiver.name, signature.name, signature.descriptor
            ))
        };

        match self.select_method(receiver, signature) {
            Selection::Class(id) | Selection::Default(id) => {
                let is_abstract = self
                    .with_method(id, |_, method| method.is_abstract())
                    .unwrap_or(true);
                if is_abstract {
                    Err(abstract_error())
                } else {
                    Ok(id)
                }
            }
            Selection::Conflict(ids) => {
                let methods = ids
                    .iter()
                    .map(|id| {
                        let interface = self.names().tpath(id.class_id());
                        format!("{}.{}", interface, signature.name)
                    })
                    .join(" ");
                Err(LinkageError::IncompatibleClassChange(format!(
                    "Conflicting default methods: {}",
                    methods
                )))
            }
            Selection::Abstract(_) | Selection::Missing => Err(abstract_error()),
        }
    }

    #[must_use]
    pub fn default_method_state(
        &self,
        receiver: ClassId,
        signature: &MethodSignature,
    ) -> DefaultMethodState {
        self.default_methods.state(receiver, signature)
    }

    #[must_use]
    pub fn default_method_entries(&self) -> Vec<(ClassId, MethodSignature, DefaultMethodState)> {
        self.default_methods.entries()
    }

    /// Format a selected method for messages
    #[must_use]
    pub fn selection_path(&self, selection: &Selection) -> String {
        match selection {
            Selection::Class(id) | Selection::Default(id) => self.method_path(*id),
            Selection::Conflict(ids) | Selection::Abstract(ids) => {
                ids.iter().map(|id| self.method_path(*id)).join(", ")
            }
            Selection::Missing => "<missing>".to_owned(),
        }
    }
}

/// Format a signature like `m()V`
#[must_use]
pub fn signature_path(class_name: &str, signature: &MethodSignature) -> String {
    util::format_method(class_name, &signature.name, &signature.descriptor)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use basalt_classfile::{
        builder::{ClassBuilder, Code},
        opcode, MethodAccessFlags,
    };

    use super::{DefaultMethodState, MethodSignature, Selection};
    use crate::{test_util::classes_with, LinkageError};

    fn default_method(builder: &mut ClassBuilder, name: &str) {
        let mut code = Code::new(0, 1);
        code.op(opcode::RETURN);
        builder.method(MethodAccessFlags::PUBLIC, name, "()V", Some(code));
    }

    fn abstract_method(builder: &mut ClassBuilder, name: &str) {
        builder.method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            name,
            "()V",
            None,
        );
    }

    fn m() -> MethodSignature {
        MethodSignature::new("m", "()V")
    }

    #[test]
    fn test_diamond_conflict() {
        let mut i1 = ClassBuilder::interface("I1");
        default_method(&mut i1, "m");
        let mut i2 = ClassBuilder::interface("I2");
        default_method(&mut i2, "m");
        let c = ClassBuilder::new("C")
            .implements("I1")
            .implements("I2")
            .clone()
            .build();
        let classes = classes_with(vec![("I1", i1.build()), ("I2", i2.build()), ("C", c)]);
        let c = classes.get_or_load("C").unwrap();

        for _ in 0..3 {
            let err = classes.select_invocable(&c, &m()).unwrap_err();
            assert_eq!(
                err,
                LinkageError::IncompatibleClassChange(
                    "Conflicting default methods: I1.m I2.m".to_owned()
                )
            );
            assert_eq!(err.java_class_name(), "java/lang/IncompatibleClassChangeError");
        }
        assert!(matches!(
            classes.default_method_state(c.id(), &m()),
            DefaultMethodState::Conflicted(ids) if ids.len() == 2
        ));
    }

    #[test]
    fn test_unique_default_is_stable() {
        let mut i = ClassBuilder::interface("I");
        default_method(&mut i, "m");
        let mut j = ClassBuilder::interface("J");
        abstract_method(&mut j, "m");
        let c = ClassBuilder::new("C")
            .implements("I")
            .implements("J")
            .clone()
            .build();
        let classes = classes_with(vec![("I", i.build()), ("J", j.build()), ("C", c)]);
        let c = classes.get_or_load("C").unwrap();
        let i = classes.get_or_load("I").unwrap();

        assert_eq!(
            classes.default_method_state(c.id(), &m()),
            DefaultMethodState::Unresolved
        );
        let first = classes.select_invocable(&c, &m()).unwrap();
        assert_eq!(first.class_id(), i.id());
        for _ in 0..3 {
            assert_eq!(classes.select_invocable(&c, &m()).unwrap(), first);
        }
        assert_eq!(
            classes.default_method_state(c.id(), &m()),
            DefaultMethodState::Resolved(first)
        );
    }

    #[test]
    fn test_subinterface_overrides() {
        // K extends I, both have defaults, K's is more specific
        let mut i = ClassBuilder::interface("I");
        default_method(&mut i, "m");
        let mut k = ClassBuilder::interface("K");
        k.implements("I");
        default_method(&mut k, "m");
        let c = ClassBuilder::new("C")
            .implements("I")
            .implements("K")
            .clone()
            .build();
        let classes = classes_with(vec![("I", i.build()), ("K", k.build()), ("C", c)]);
        let c = classes.get_or_load("C").unwrap();
        let k = classes.get_or_load("K").unwrap();
        assert_eq!(
            classes.select_invocable(&c, &m()).unwrap().class_id(),
            k.id()
        );
    }

    #[test]
    fn test_abstract_subinterface_hides_default() {
        let mut i = ClassBuilder::interface("I");
        default_method(&mut i, "m");
        let mut k = ClassBuilder::interface("K");
        k.implements("I");
        abstract_method(&mut k, "m");
        let c = ClassBuilder::new("C").implements("K").clone().build();
        let classes = classes_with(vec![("I", i.build()), ("K", k.build()), ("C", c)]);
        let c = classes.get_or_load("C").unwrap();
        assert!(matches!(
            classes.select_method(&c, &m()),
            Selection::Abstract(ids) if ids.len() == 1
        ));
        assert!(matches!(
            classes.select_invocable(&c, &m()),
            Err(LinkageError::AbstractMethod(_))
        ));
    }

    #[test]
    fn test_class_method_wins() {
        let mut i = ClassBuilder::interface("I");
        default_method(&mut i, "m");
        let mut base = ClassBuilder::new("Base");
        default_method(&mut base, "m");
        let c = ClassBuilder::new("C")
            .with_super(Some("Base"))
            .implements("I")
            .clone()
            .build();
        let classes = classes_with(vec![("I", i.build()), ("Base", base.build()), ("C", c)]);
        let c = classes.get_or_load("C").unwrap();
        let base = classes.get_or_load("Base").unwrap();
        match classes.select_method(&c, &m()) {
            Selection::Class(id) => assert_eq!(id.class_id(), base.id()),
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing() {
        let c = ClassBuilder::new("C").build();
        let classes = classes_with(vec![("C", c)]);
        let c = classes.get_or_load("C").unwrap();
        assert_eq!(classes.select_method(&c, &m()), Selection::Missing);
        assert_eq!(
            classes.default_method_state(c.id(), &m()),
            DefaultMethodState::Missing
        );
    }

    #[test]
    fn test_concurrent_selection() {
        let mut i = ClassBuilder::interface("I");
        default_method(&mut i, "m");
        let c = ClassBuilder::new("C").implements("I").clone().build();
        let classes = Arc::new(classes_with(vec![("I", i.build()), ("C", c)]));
        let c = classes.get_or_load("C").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let classes = Arc::clone(&classes);
                let c = Arc::clone(&c);
                std::thread::spawn(move || classes.select_method(&c, &m()))
            })
            .collect();
        let results: Vec<Selection> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(matches!(results[0], Selection::Default(_)));
        assert!(results.iter().all(|result| *result == results[0]));
        assert_eq!(classes.default_method_entries().len(), 1);
    }
}
