use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use basalt_base::{
    class::Class,
    code::InstructionIndex,
    default_methods::MethodSignature,
    id::{ClassId, MethodId},
};
use indexmap::IndexMap;

/// The concrete instance methods a class declares or inherits through its superclasses, keyed by
/// signature. Built when the class is linked.
/// Methods only reachable as interface defaults are not in the table; dispatch falls back to the
/// default method resolver for those.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: IndexMap<MethodSignature, MethodId>,
}
impl MethodTable {
    #[must_use]
    pub fn build(class: &Class, super_table: Option<&MethodTable>) -> MethodTable {
        let mut methods = super_table.map_or_else(IndexMap::new, |table| table.methods.clone());

        for method in class.methods() {
            if method.is_static() || method.is_private() || method.name().starts_with('<') {
                continue;
            }

            let signature = MethodSignature::new(method.name(), method.descriptor());
            if method.is_abstract() {
                // Redeclaring a method as abstract hides the inherited implementation
                methods.shift_remove(&signature);
            } else {
                methods.insert(signature, method.id());
            }
        }

        MethodTable { methods }
    }

    #[must_use]
    pub fn get(&self, signature: &MethodSignature) -> Option<MethodId> {
        self.methods.get(signature).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MethodSignature, MethodId)> {
        self.methods.iter().map(|(sig, id)| (sig, *id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The last (receiver class, selected method) pair seen at each virtual or interface call site
#[derive(Debug, Default)]
pub struct CallSiteCache {
    sites: RwLock<HashMap<(MethodId, InstructionIndex), (ClassId, MethodId)>>,
}
impl CallSiteCache {
    /// The cached method, if the last receiver at this site had the same class
    #[must_use]
    pub fn get(
        &self,
        caller: MethodId,
        at: InstructionIndex,
        receiver: ClassId,
    ) -> Option<MethodId> {
        let sites = self.sites.read().unwrap_or_else(PoisonError::into_inner);
        match sites.get(&(caller, at)) {
            Some((class_id, method_id)) if *class_id == receiver => Some(*method_id),
            _ => None,
        }
    }

    pub fn set(&self, caller: MethodId, at: InstructionIndex, receiver: ClassId, target: MethodId) {
        let mut sites = self.sites.write().unwrap_or_else(PoisonError::into_inner);
        sites.insert((caller, at), (receiver, target));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
