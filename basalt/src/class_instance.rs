use basalt_base::id::{ClassId, FieldId};
use basalt_classfile::FieldType;
use indexmap::IndexMap;

use crate::{gc::MemorySize, rv::RuntimeValue};

macro_rules! try_from_instance {
    ($variant_name:ident => $name:ty) => {
        impl<'a> TryFrom<&'a Instance> for &'a $name {
            type Error = ();
            fn try_from(i: &'a Instance) -> Result<&'a $name, ()> {
                match i {
                    Instance::$variant_name(x) => Ok(x),
                    _ => Err(()),
                }
            }
        }

        impl<'a> TryFrom<&'a mut Instance> for &'a mut $name {
            type Error = ();
            fn try_from(i: &'a mut Instance) -> Result<&'a mut $name, ()> {
                match i {
                    Instance::$variant_name(x) => Ok(x),
                    _ => Err(()),
                }
            }
        }

        impl From<$name> for Instance {
            fn from(value: $name) -> Instance {
                Instance::$variant_name(value)
            }
        }
    };
}

/// An instance of a class, made generic over several common variants
#[derive(Debug, Clone)]
pub enum Instance {
    Class(ClassInstance),
    StaticClass(StaticClassInstance),
    Array(ArrayInstance),
    String(StringInstance),
}
impl Instance {
    /// The class this is an instance of.
    /// For the static instance this is the class it holds the static fields of.
    #[must_use]
    pub fn instanceof(&self) -> ClassId {
        match self {
            Instance::Class(x) => x.instanceof,
            Instance::StaticClass(x) => x.id,
            Instance::Array(x) => x.instanceof,
            Instance::String(x) => x.instanceof,
        }
    }
}
impl MemorySize for Instance {
    fn memory_size(&self) -> usize {
        match self {
            Instance::Class(x) => x.memory_size(),
            Instance::StaticClass(x) => x.memory_size(),
            Instance::Array(x) => x.memory_size(),
            Instance::String(x) => x.memory_size(),
        }
    }
}

/// An instance of some class
#[derive(Debug, Clone)]
pub struct ClassInstance {
    /// The most specific Class that this is an instance of
    pub instanceof: ClassId,
    /// Fields that it owns, including those declared by its superclasses
    pub fields: Fields,
}
try_from_instance!(Class => ClassInstance);
impl ClassInstance {
    #[must_use]
    pub fn new(instanceof: ClassId, fields: Fields) -> ClassInstance {
        ClassInstance { instanceof, fields }
    }
}
impl MemorySize for ClassInstance {
    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.fields.memory_size()
    }
}

/// Holds the static fields of a class. Its monitor is the one `static synchronized` methods use.
#[derive(Debug, Clone)]
pub struct StaticClassInstance {
    /// Its own id
    pub id: ClassId,
    /// Static fields
    pub fields: Fields,
}
try_from_instance!(StaticClass => StaticClassInstance);
impl StaticClassInstance {
    #[must_use]
    pub fn new(id: ClassId, fields: Fields) -> StaticClassInstance {
        StaticClassInstance { id, fields }
    }
}
impl MemorySize for StaticClassInstance {
    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.fields.memory_size()
    }
}

/// The contents of a `java/lang/String`, as UTF-16 code units
pub type JavaString = Vec<u16>;

#[derive(Debug, Clone)]
pub struct StringInstance {
    pub instanceof: ClassId,
    pub value: JavaString,
}
try_from_instance!(String => StringInstance);
impl StringInstance {
    #[must_use]
    pub fn new(instanceof: ClassId, value: &str) -> StringInstance {
        StringInstance {
            instanceof,
            value: value.encode_utf16().collect(),
        }
    }

    /// Convert to a rust string, replacing unpaired surrogates
    #[must_use]
    pub fn to_rust_string(&self) -> String {
        String::from_utf16_lossy(&self.value)
    }
}
impl MemorySize for StringInstance {
    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.value.len() * 2
    }
}

#[derive(Debug, Clone)]
pub struct ArrayInstance {
    /// The array class
    pub instanceof: ClassId,
    pub element_type: FieldType,
    pub elements: Vec<RuntimeValue>,
}
try_from_instance!(Array => ArrayInstance);
impl ArrayInstance {
    #[must_use]
    pub fn new(
        instanceof: ClassId,
        element_type: FieldType,
        elements: Vec<RuntimeValue>,
    ) -> ArrayInstance {
        ArrayInstance {
            instanceof,
            element_type,
            elements,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
impl MemorySize for ArrayInstance {
    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.elements.len() * std::mem::size_of::<RuntimeValue>()
    }
}

/// Field values keyed by the field they belong to, so that a field hidden by a subclass field of
/// the same name is still its own slot
#[derive(Debug, Clone, Default)]
pub struct Fields {
    fields: IndexMap<FieldId, RuntimeValue>,
}
impl Fields {
    #[must_use]
    pub fn get(&self, id: FieldId) -> Option<RuntimeValue> {
        self.fields.get(&id).copied()
    }

    /// Set an existing field, returning false if there is no such field
    pub fn set(&mut self, id: FieldId, value: RuntimeValue) -> bool {
        if let Some(field) = self.fields.get_mut(&id) {
            *field = value;
            true
        } else {
            false
        }
    }

    pub fn insert(&mut self, id: FieldId, value: RuntimeValue) {
        self.fields.insert(id, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, RuntimeValue)> + '_ {
        self.fields.iter().map(|(id, value)| (*id, *value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
impl MemorySize for Fields {
    fn memory_size(&self) -> usize {
        self.fields.len() * (std::mem::size_of::<FieldId>() + std::mem::size_of::<RuntimeValue>())
    }
}
