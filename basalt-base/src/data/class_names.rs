use std::sync::{Arc, RwLock};

use indexmap::IndexSet;

use crate::id::ClassId;

/// Interns binary class names, giving each a stable [`ClassId`].
/// Ids are handed out in order of first appearance and are never reused.
#[derive(Debug, Default)]
pub struct ClassNames {
    names: RwLock<IndexSet<Arc<str>>>,
}
impl ClassNames {
    #[must_use]
    pub fn new() -> ClassNames {
        ClassNames::default()
    }

    /// Get the id for a class name, registering it if needed.
    /// This does not load the class.
    pub fn gcid_from_str(&self, name: &str) -> ClassId {
        {
            let names = self.names.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(idx) = names.get_index_of(name) {
                return ClassId::new_unchecked(idx as u32);
            }
        }

        let mut names = self
            .names
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Someone may have inserted it between the locks, which insert_full handles
        let (idx, _) = names.insert_full(Arc::from(name));
        ClassId::new_unchecked(idx as u32)
    }

    /// Get the id of a name only if it has been registered
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ClassId> {
        let names = self.names.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        names
            .get_index_of(name)
            .map(|idx| ClassId::new_unchecked(idx as u32))
    }

    #[must_use]
    pub fn name(&self, id: ClassId) -> Option<Arc<str>> {
        let names = self.names.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        names.get_index(id.get() as usize).cloned()
    }

    /// Get the name of the class for messages, or a placeholder if the id is unknown
    #[must_use]
    pub fn tpath(&self, id: ClassId) -> String {
        self.name(id)
            .map_or_else(|| format!("<unknown class #{}>", id.get()), |name| name.to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ClassNames;

    #[test]
    fn test_interning() {
        let names = ClassNames::new();
        let object = names.gcid_from_str("java/lang/Object");
        let string = names.gcid_from_str("java/lang/String");
        assert_ne!(object, string);
        assert_eq!(names.gcid_from_str("java/lang/Object"), object);
        assert_eq!(names.name(string).as_deref(), Some("java/lang/String"));
        assert_eq!(names.find("Missing"), None);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_concurrent_interning() {
        let names = Arc::new(ClassNames::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let names = Arc::clone(&names);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| names.gcid_from_str(&format!("C{}", i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(names.len(), 50);
    }
}
