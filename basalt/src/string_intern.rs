use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use basalt_base::id::ClassId;

use crate::{
    class_instance::StringInstance,
    gc::{Gc, GcRef},
};

/// The strings created from `ldc` constants. Equal constants always give the same object, across
/// classes and threads.
#[derive(Default, Debug)]
pub struct StringInterner {
    data: Mutex<HashMap<String, GcRef<StringInstance>>>,
}
impl StringInterner {
    #[must_use]
    pub fn get(&self, value: &str) -> Option<GcRef<StringInstance>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(value)
            .copied()
    }

    /// Get the interned string with the given contents, allocating it if it doesn't exist yet.
    /// `string_id` is the id of `java/lang/String`.
    pub fn intern(&self, gc: &Gc, string_id: ClassId, value: &str) -> GcRef<StringInstance> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(string_ref) = data.get(value) {
            return *string_ref;
        }

        let string_ref = gc.alloc(StringInstance::new(string_id, value));
        data.insert(value.to_owned(), string_ref);
        string_ref
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use basalt_base::{Classes, Config};

    use super::StringInterner;
    use crate::gc::Gc;

    #[test]
    fn test_interning() {
        let classes = Classes::new(Config::default(), Box::new(HashMap::new()));
        let string_id = classes.names().gcid_from_str("java/lang/String");
        let gc = Gc::new();
        let interner = StringInterner::default();

        let hello = interner.intern(&gc, string_id, "hello");
        let again = interner.intern(&gc, string_id, "hello");
        let other = interner.intern(&gc, string_id, "other");
        assert_eq!(hello, again);
        assert_ne!(hello, other);
        assert_eq!(interner.len(), 2);
        assert_eq!(gc.len(), 2);
        assert_eq!(interner.get("other"), Some(other));
        assert_eq!(
            gc.deref(hello, |s| s.to_rust_string()).as_deref(),
            Some("hello")
        );
    }
}
