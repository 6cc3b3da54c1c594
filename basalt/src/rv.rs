use basalt_base::code::op::ValueKind;
use basalt_classfile::FieldType;

use crate::{class_instance::Instance, gc::GcRef};

/// A primitive value as it exists on the operand stack or in a local.
/// `byte`, `char`, `short` and `boolean` are widened to ints, and only narrowed again when they
/// are stored into fields or arrays of that type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValuePrimitive {
    I64(i64),
    I32(i32),
    F32(f32),
    F64(f64),
}
impl RuntimeValuePrimitive {
    #[must_use]
    pub fn is_category_2(&self) -> bool {
        matches!(self, RuntimeValuePrimitive::I64(_) | RuntimeValuePrimitive::F64(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValue {
    Primitive(RuntimeValuePrimitive),
    NullReference,
    Reference(GcRef<Instance>),
}
impl RuntimeValue {
    /// The value a field or array element of the given type starts with
    #[must_use]
    pub fn default_for(typ: &FieldType) -> RuntimeValue {
        match ValueKind::from_field_type(typ) {
            ValueKind::Int => RuntimeValuePrimitive::I32(0).into(),
            ValueKind::Long => RuntimeValuePrimitive::I64(0).into(),
            ValueKind::Float => RuntimeValuePrimitive::F32(0.0).into(),
            ValueKind::Double => RuntimeValuePrimitive::F64(0.0).into(),
            ValueKind::Reference => RuntimeValue::NullReference,
        }
    }

    /// Narrow an int to the range of the field type it is being stored into.
    /// Values of other types are returned unchanged.
    #[must_use]
    pub fn narrow_to(self, typ: &FieldType) -> RuntimeValue {
        let value = match self.into_int() {
            Some(value) => value,
            None => return self,
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let narrowed = match typ {
            FieldType::Byte => i32::from(value as i8),
            FieldType::Char => i32::from(value as u16),
            FieldType::Short => i32::from(value as i16),
            FieldType::Boolean => value & 1,
            _ => value,
        };
        RuntimeValuePrimitive::I32(narrowed).into()
    }

    #[must_use]
    pub fn is_category_2(&self) -> bool {
        match self {
            RuntimeValue::Primitive(prim) => prim.is_category_2(),
            RuntimeValue::NullReference | RuntimeValue::Reference(_) => false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            RuntimeValue::Primitive(RuntimeValuePrimitive::I32(_)) => ValueKind::Int,
            RuntimeValue::Primitive(RuntimeValuePrimitive::I64(_)) => ValueKind::Long,
            RuntimeValue::Primitive(RuntimeValuePrimitive::F32(_)) => ValueKind::Float,
            RuntimeValue::Primitive(RuntimeValuePrimitive::F64(_)) => ValueKind::Double,
            RuntimeValue::NullReference | RuntimeValue::Reference(_) => ValueKind::Reference,
        }
    }

    #[must_use]
    pub fn into_int(self) -> Option<i32> {
        match self {
            RuntimeValue::Primitive(RuntimeValuePrimitive::I32(x)) => Some(x),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_i64(self) -> Option<i64> {
        match self {
            RuntimeValue::Primitive(RuntimeValuePrimitive::I64(x)) => Some(x),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_f32(self) -> Option<f32> {
        match self {
            RuntimeValue::Primitive(RuntimeValuePrimitive::F32(x)) => Some(x),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_f64(self) -> Option<f64> {
        match self {
            RuntimeValue::Primitive(RuntimeValuePrimitive::F64(x)) => Some(x),
            _ => None,
        }
    }

    /// `None` if it is not a reference, `Some(None)` if it is null
    #[must_use]
    pub fn into_reference(self) -> Option<Option<GcRef<Instance>>> {
        match self {
            RuntimeValue::Reference(x) => Some(Some(x)),
            RuntimeValue::NullReference => Some(None),
            RuntimeValue::Primitive(_) => None,
        }
    }
}
impl From<RuntimeValuePrimitive> for RuntimeValue {
    fn from(prim: RuntimeValuePrimitive) -> RuntimeValue {
        RuntimeValue::Primitive(prim)
    }
}
impl<T> From<Option<GcRef<T>>> for RuntimeValue {
    fn from(value: Option<GcRef<T>>) -> RuntimeValue {
        match value {
            Some(value) => RuntimeValue::Reference(value.into_generic()),
            None => RuntimeValue::NullReference,
        }
    }
}
impl<T> From<GcRef<T>> for RuntimeValue {
    fn from(value: GcRef<T>) -> RuntimeValue {
        RuntimeValue::Reference(value.into_generic())
    }
}

#[cfg(test)]
mod tests {
    use basalt_classfile::FieldType;

    use super::{RuntimeValue, RuntimeValuePrimitive};

    #[test]
    fn test_narrowing() {
        let value: RuntimeValue = RuntimeValuePrimitive::I32(0x1_81).into();
        assert_eq!(value.narrow_to(&FieldType::Byte).into_int(), Some(-127));
        assert_eq!(value.narrow_to(&FieldType::Boolean).into_int(), Some(1));
        assert_eq!(value.narrow_to(&FieldType::Int).into_int(), Some(0x1_81));

        let value: RuntimeValue = RuntimeValuePrimitive::I32(-1).into();
        assert_eq!(value.narrow_to(&FieldType::Char).into_int(), Some(0xFFFF));
        assert_eq!(value.narrow_to(&FieldType::Short).into_int(), Some(-1));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            RuntimeValue::default_for(&FieldType::Long),
            RuntimeValuePrimitive::I64(0).into()
        );
        assert_eq!(
            RuntimeValue::default_for(&FieldType::Object("A".to_owned())),
            RuntimeValue::NullReference
        );
        assert!(RuntimeValue::default_for(&FieldType::Double).is_category_2());
    }
}
