use std::{fmt, sync::Arc};

use basalt_base::{class::Class, code::op::ValueKind, Classes, OBJECT_NAME};
use basalt_classfile::FieldType;

use crate::VerifyErrorKind;

/// A type for verifying frames.
/// Category 2 values are a single entry on the stack, and a value followed by [`FrameType::Top`]
/// in the locals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameType {
    /// Unusable, either unset or the result of merging incompatible types
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    /// An initialized reference to the named class. Arrays are named by their descriptor.
    Reference(Arc<str>),
    /// `this` in a constructor before the super constructor has been called
    UninitializedThis,
    /// The result of the `new` instruction at the given offset, before its constructor runs
    Uninitialized(u16),
}
impl FrameType {
    pub(crate) fn reference(name: &str) -> FrameType {
        FrameType::Reference(Arc::from(name))
    }

    /// The type a value of `typ` has on the stack. Small integral types are widened to int.
    pub(crate) fn from_field_type(typ: &FieldType) -> FrameType {
        match typ {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Int
            | FieldType::Short
            | FieldType::Boolean => FrameType::Int,
            FieldType::Long => FrameType::Long,
            FieldType::Float => FrameType::Float,
            FieldType::Double => FrameType::Double,
            FieldType::Object(name) => FrameType::reference(name),
            FieldType::Array(_) => FrameType::Reference(Arc::from(typ.to_string())),
        }
    }

    #[must_use]
    pub fn is_category_1(&self) -> bool {
        !self.is_category_2()
    }

    #[must_use]
    pub fn is_category_2(&self) -> bool {
        matches!(self, FrameType::Long | FrameType::Double)
    }

    /// Whether this is a reference type, initialized or not
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            FrameType::Null
                | FrameType::Reference(_)
                | FrameType::UninitializedThis
                | FrameType::Uninitialized(_)
        )
    }

    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            FrameType::UninitializedThis | FrameType::Uninitialized(_)
        )
    }

    /// The number of stack words this takes
    pub(crate) fn size(&self) -> u16 {
        if self.is_category_2() {
            2
        } else {
            1
        }
    }

    /// Whether this is exactly the kind of value a load/store/return of `kind` moves.
    /// References must be initialized.
    pub(crate) fn matches_primitive(&self, kind: ValueKind) -> bool {
        matches!(
            (kind, self),
            (ValueKind::Int, FrameType::Int)
                | (ValueKind::Long, FrameType::Long)
                | (ValueKind::Float, FrameType::Float)
                | (ValueKind::Double, FrameType::Double)
                | (ValueKind::Reference, FrameType::Null | FrameType::Reference(_))
        )
    }
}
impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Top => f.write_str("top"),
            FrameType::Int => f.write_str("int"),
            FrameType::Float => f.write_str("float"),
            FrameType::Long => f.write_str("long"),
            FrameType::Double => f.write_str("double"),
            FrameType::Null => f.write_str("null"),
            FrameType::Reference(name) => write!(f, "'{}'", name),
            FrameType::UninitializedThis => f.write_str("uninitializedThis"),
            FrameType::Uninitialized(at) => write!(f, "uninitialized(@{})", at),
        }
    }
}

/// Write the descriptor form of a class name, used for building array type names
fn descriptor_of(name: &str) -> String {
    if name.starts_with('[') {
        name.to_owned()
    } else {
        format!("L{};", name)
    }
}

/// The class name of the component of the array class `name`, if it is an array of references
pub(crate) fn reference_component(name: &str) -> Option<&str> {
    let component = name.strip_prefix('[')?;
    if component.starts_with('[') {
        Some(component)
    } else {
        component.strip_prefix('L')?.strip_suffix(';')
    }
}

/// Answers subtyping questions between the types in frames, loading classes as needed.
/// Interfaces are treated like `java/lang/Object`: every reference is assignable to an interface
/// type, and merging with one gives `java/lang/Object`.
pub(crate) struct TypeContext<'a> {
    pub(crate) classes: &'a Classes,
}
impl<'a> TypeContext<'a> {
    fn load(&self, name: &str) -> Result<Arc<Class>, VerifyErrorKind> {
        self.classes
            .get_or_load(name)
            .map_err(VerifyErrorKind::Linkage)
    }

    /// Whether a value of type `from` can be used where the class `to` is expected.
    /// Uninitialized values are never assignable.
    pub(crate) fn is_assignable_to_class(
        &self,
        from: &FrameType,
        to: &str,
    ) -> Result<bool, VerifyErrorKind> {
        match from {
            FrameType::Null => Ok(true),
            FrameType::Reference(name) => self.is_reference_assignable(name, to),
            _ => Ok(false),
        }
    }

    /// Whether a value of type `from` can be stored somewhere declared as `to`
    pub(crate) fn is_assignable(
        &self,
        from: &FrameType,
        to: &FieldType,
    ) -> Result<bool, VerifyErrorKind> {
        match FrameType::from_field_type(to) {
            FrameType::Reference(to) => self.is_assignable_to_class(from, &to),
            expected => Ok(*from == expected),
        }
    }

    fn is_reference_assignable(&self, from: &str, to: &str) -> Result<bool, VerifyErrorKind> {
        if from == to || to == OBJECT_NAME {
            return Ok(true);
        }

        if to.starts_with('[') {
            if !from.starts_with('[') {
                return Ok(false);
            }

            return match (reference_component(from), reference_component(to)) {
                (Some(from), Some(to)) => self.is_reference_assignable(from, to),
                // Primitive arrays are only assignable to themselves, which was checked above
                _ => Ok(false),
            };
        }

        let to_class = self.load(to)?;
        if to_class.is_interface() {
            return Ok(true);
        }

        if from.starts_with('[') {
            return Ok(false);
        }

        let from_class = self.load(from)?;
        Ok(self
            .classes
            .is_same_or_subclass(from_class.id(), to_class.id()))
    }

    /// The least upper bound of two types. Incompatible types merge into Top.
    pub(crate) fn merge(
        &self,
        left: &FrameType,
        right: &FrameType,
    ) -> Result<FrameType, VerifyErrorKind> {
        if left == right {
            return Ok(left.clone());
        }

        Ok(match (left, right) {
            (FrameType::Null, FrameType::Reference(_)) => right.clone(),
            (FrameType::Reference(_), FrameType::Null) => left.clone(),
            (FrameType::Reference(left), FrameType::Reference(right)) => {
                FrameType::Reference(self.merge_references(left, right)?)
            }
            _ => FrameType::Top,
        })
    }

    fn merge_references(&self, left: &str, right: &str) -> Result<Arc<str>, VerifyErrorKind> {
        if left == right {
            return Ok(Arc::from(left));
        }

        if left == OBJECT_NAME || right == OBJECT_NAME {
            return Ok(Arc::from(OBJECT_NAME));
        }

        match (left.starts_with('['), right.starts_with('[')) {
            (true, true) => {
                return match (reference_component(left), reference_component(right)) {
                    (Some(left), Some(right)) => {
                        let component = self.merge_references(left, right)?;
                        Ok(Arc::from(format!("[{}", descriptor_of(&component))))
                    }
                    _ => Ok(Arc::from(OBJECT_NAME)),
                };
            }
            (false, false) => {}
            _ => return Ok(Arc::from(OBJECT_NAME)),
        }

        let left = self.load(left)?;
        let right = self.load(right)?;
        if left.is_interface() || right.is_interface() {
            return Ok(Arc::from(OBJECT_NAME));
        }

        let common = self
            .classes
            .first_common_super_class(left.id(), right.id())
            .and_then(|id| self.classes.names().name(id));
        Ok(common.unwrap_or_else(|| Arc::from(OBJECT_NAME)))
    }
}

#[cfg(test)]
mod tests {
    use super::{reference_component, FrameType};
    use basalt_classfile::FieldType;

    #[test]
    fn test_reference_component() {
        assert_eq!(reference_component("[Ljava/lang/String;"), Some("java/lang/String"));
        assert_eq!(reference_component("[[I"), Some("[I"));
        assert_eq!(reference_component("[I"), None);
        assert_eq!(reference_component("java/lang/String"), None);
    }

    #[test]
    fn test_from_field_type() {
        assert_eq!(FrameType::from_field_type(&FieldType::Boolean), FrameType::Int);
        assert_eq!(
            FrameType::from_field_type(&FieldType::Array(Box::new(FieldType::Int))),
            FrameType::reference("[I")
        );
        assert!(FrameType::Long.is_category_2());
        assert_eq!(FrameType::Double.size(), 2);
    }
}
