//! The object heap.
//! This is an arena: objects are allocated into slots that are never freed, since collection is
//! out of scope. References are indices into the arena, typed with what the object is expected
//! to hold so that most code doesn't have to re-check the variant of the instance.
//!
//! The heap is shared between interpreter threads. Each object has its own lock for its contents
//! and its own monitor, so threads only contend when touching the same object.
use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, PoisonError, RwLock,
    },
    thread::ThreadId,
};

use basalt_base::id::ClassId;

use crate::class_instance::Instance;

/// Approximate size in bytes, for the heap statistics
pub trait MemorySize {
    fn memory_size(&self) -> usize;
}

pub struct Gc {
    /// The rough amount of memory that the objects are using
    bytes_used: AtomicUsize,
    objects: RwLock<Vec<Arc<GcObject>>>,
}
impl Gc {
    #[must_use]
    pub fn new() -> Gc {
        Gc {
            bytes_used: AtomicUsize::new(0),
            objects: RwLock::new(Vec::new()),
        }
    }

    pub fn alloc<T: Into<Instance>>(&self, value: T) -> GcRef<T> {
        let value: Instance = value.into();
        // The amount of memory that the value and our tracking will take in memory
        let size = value.memory_size() + std::mem::size_of::<GcObject>();
        self.bytes_used.fetch_add(size, Ordering::Relaxed);

        let object = Arc::new(GcObject {
            class_id: value.instanceof(),
            size,
            monitor: Monitor::default(),
            value: Mutex::new(value),
        });

        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.push(object);
        GcRef::new_unchecked(objects.len() - 1)
    }

    fn object<T>(&self, reference: GcRef<T>) -> Option<Arc<GcObject>> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects.get(reference.index).cloned()
    }

    /// Run `f` with the object, if it exists and holds a `T`.
    /// The object is locked while `f` runs, so `f` must not access the same object through the
    /// heap again.
    pub fn deref<T, R>(&self, reference: GcRef<T>, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        for<'a> &'a T: TryFrom<&'a Instance>,
    {
        let object = self.object(reference)?;
        let value = object.value.lock().unwrap_or_else(PoisonError::into_inner);
        <&T>::try_from(&*value).ok().map(f)
    }

    pub fn deref_mut<T, R>(&self, reference: GcRef<T>, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        for<'a> &'a mut T: TryFrom<&'a mut Instance>,
    {
        let object = self.object(reference)?;
        let mut value = object.value.lock().unwrap_or_else(PoisonError::into_inner);
        <&mut T>::try_from(&mut *value).ok().map(f)
    }

    /// The class the object is an instance of
    #[must_use]
    pub fn class_of<T>(&self, reference: GcRef<T>) -> Option<ClassId> {
        self.object(reference).map(|object| object.class_id)
    }

    #[must_use]
    pub fn monitor<T>(&self, reference: GcRef<T>) -> Option<MonitorRef> {
        self.object(reference).map(|object| MonitorRef { object })
    }

    /// Check that the reference is to an object holding a `T`, giving the typed reference
    #[must_use]
    pub fn checked_as<T>(&self, reference: GcRef<Instance>) -> Option<GcRef<T>>
    where
        for<'a> &'a T: TryFrom<&'a Instance>,
    {
        self.deref(reference.unchecked_as::<T>(), |_| ())
            .map(|()| reference.unchecked_as())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.bytes_used.load(Ordering::Relaxed)
    }

    /// The number of objects and the bytes they use, per class
    #[must_use]
    pub fn histogram(&self) -> HashMap<ClassId, (usize, usize)> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut histogram: HashMap<ClassId, (usize, usize)> = HashMap::new();
        for object in objects.iter() {
            let entry = histogram.entry(object.class_id).or_default();
            entry.0 += 1;
            entry.1 += object.size;
        }
        histogram
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GcObject {
    class_id: ClassId,
    size: usize,
    monitor: Monitor,
    value: Mutex<Instance>,
}

/// A handle to the monitor of an object, which keeps the object alive while held
pub struct MonitorRef {
    object: Arc<GcObject>,
}
impl MonitorRef {
    pub fn enter(&self, thread: ThreadId) {
        self.object.monitor.enter(thread);
    }

    /// Returns false if the thread does not own the monitor
    #[must_use]
    pub fn exit(&self, thread: ThreadId) -> bool {
        self.object.monitor.exit(thread)
    }

    #[must_use]
    pub fn owner(&self) -> Option<(ThreadId, u32)> {
        self.object.monitor.owner()
    }
}

/// A reentrant monitor
#[derive(Default)]
struct Monitor {
    /// The owning thread and how many times it has entered
    owner: Mutex<Option<(ThreadId, u32)>>,
    released: Condvar,
}
impl Monitor {
    fn enter(&self, thread: ThreadId) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &mut *owner {
                Some((current, count)) if *current == thread => {
                    *count += 1;
                    return;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    *owner = Some((thread, 1));
                    return;
                }
            }
        }
    }

    fn exit(&self, thread: ThreadId) -> bool {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *owner {
            Some((current, count)) if *current == thread => {
                *count -= 1;
                if *count == 0 {
                    *owner = None;
                    self.released.notify_one();
                }
                true
            }
            _ => false,
        }
    }

    fn owner(&self) -> Option<(ThreadId, u32)> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reference to an object in the Gc
/// Should not be used across Gc instances
pub struct GcRef<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}
impl<T> GcRef<T> {
    fn new_unchecked(index: usize) -> GcRef<T> {
        GcRef {
            index,
            _marker: PhantomData,
        }
    }

    /// Forget what kind of instance this refers to
    #[must_use]
    pub fn into_generic(self) -> GcRef<Instance> {
        self.unchecked_as()
    }

    /// A hash that is stable for the lifetime of the object, for `Object.hashCode`.
    /// Objects are never moved, so this is derived from the slot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn identity_hash(self) -> i32 {
        // Mix the bits so that neighbouring objects don't get neighbouring hashes
        let mixed = (self.index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (mixed >> 33) as i32
    }

    /// Converts the generic parameter into U, unchecked
    #[must_use]
    pub fn unchecked_as<U>(self) -> GcRef<U> {
        GcRef {
            index: self.index,
            _marker: PhantomData,
        }
    }
}
impl<T> Copy for GcRef<T> {}
impl<T> Clone for GcRef<T> {
    #[inline]
    fn clone(&self) -> GcRef<T> {
        *self
    }
}

// This can be wrong if there is more than one Gc instance
impl<T> Eq for GcRef<T> {}
impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &GcRef<T>) -> bool {
        self.index == other.index
    }
}
impl<T> std::hash::Hash for GcRef<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> std::fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let full_name = std::any::type_name::<T>();
        // Get the last part if possible, otherwise use the full name
        let name = full_name.split("::").last().unwrap_or(full_name);
        write!(f, "gcref({}:{})", self.index, name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Gc;
    use crate::class_instance::{ArrayInstance, ClassInstance, Fields, Instance};
    use crate::rv::{RuntimeValue, RuntimeValuePrimitive};
    use basalt_base::{id::ClassId, Classes, Config};
    use basalt_classfile::FieldType;

    fn some_class_id() -> ClassId {
        let classes = Classes::new(Config::default(), Box::new(std::collections::HashMap::new()));
        classes.names().gcid_from_str("A")
    }

    #[test]
    fn test_alloc_and_deref() {
        let gc = Gc::new();
        let id = some_class_id();
        let array = gc.alloc(ArrayInstance::new(
            id,
            FieldType::Int,
            vec![RuntimeValuePrimitive::I32(3).into()],
        ));
        assert_eq!(gc.deref(array, |array| array.len()), Some(1));
        gc.deref_mut(array, |array| {
            array.elements[0] = RuntimeValuePrimitive::I32(4).into();
        });
        assert_eq!(
            gc.deref(array, |array| array.elements[0]),
            Some(RuntimeValue::Primitive(RuntimeValuePrimitive::I32(4)))
        );

        // Asking for the wrong kind of instance fails
        let wrong = array.unchecked_as::<ClassInstance>();
        assert_eq!(gc.deref(wrong, |_| ()), None);
        assert!(gc.checked_as::<ClassInstance>(array.into_generic()).is_none());
        assert!(gc.checked_as::<ArrayInstance>(array.into_generic()).is_some());
        assert_eq!(gc.class_of(array), Some(id));

        let object = gc.alloc(ClassInstance::new(id, Fields::default()));
        assert_eq!(gc.len(), 2);
        let histogram = gc.histogram();
        assert_eq!(histogram.get(&id).map(|x| x.0), Some(2));
        assert!(gc.deref(object.into_generic(), |instance: &Instance| instance.instanceof()).is_some());
    }

    #[test]
    fn test_monitor_reentrant() {
        let gc = Arc::new(Gc::new());
        let object = gc.alloc(ClassInstance::new(some_class_id(), Fields::default()));
        let monitor = gc.monitor(object).unwrap();
        let me = std::thread::current().id();
        monitor.enter(me);
        monitor.enter(me);
        assert_eq!(monitor.owner(), Some((me, 2)));

        let other_gc = Arc::clone(&gc);
        let other = std::thread::spawn(move || {
            let monitor = other_gc.monitor(object).unwrap();
            // Not the owner
            let exited = monitor.exit(std::thread::current().id());
            monitor.enter(std::thread::current().id());
            let owner = monitor.owner().map(|(_, count)| count);
            assert!(monitor.exit(std::thread::current().id()));
            (exited, owner)
        });

        assert!(monitor.exit(me));
        assert!(monitor.exit(me));
        let (exited, owner) = other.join().unwrap();
        assert!(!exited);
        assert_eq!(owner, Some(1));
        assert_eq!(monitor.owner(), None);
    }
}
