pub(crate) trait HashWrapperTrait<T> {
    type HashMapHasher;
}
pub(crate) struct HashWrapper;
impl<T> HashWrapperTrait<T> for HashWrapper {
    #[cfg(feature = "implementation-cheaper-map-hashing")]
    type HashMapHasher = nohash_hasher::BuildNoHashHasher<T>;
    #[cfg(not(feature = "implementation-cheaper-map-hashing"))]
    type HashMapHasher = std::collections::hash_map::RandomState;
}

/// The names of the interfaces that every array type implements
pub const ARRAY_INTERFACE_NAMES: [&str; 2] = ["java/lang/Cloneable", "java/io/Serializable"];

/// Format a method for messages, like `java/lang/Object.hashCode()I`
#[must_use]
pub fn format_method(class_name: &str, name: &str, descriptor: &str) -> String {
    format!("{}.{}{}", class_name, name, descriptor)
}

/// Format a field for messages, like `Point.x:I`
#[must_use]
pub fn format_field(class_name: &str, name: &str, descriptor: &str) -> String {
    format!("{}.{}:{}", class_name, name, descriptor)
}

/// Convert the internal form of a class name into the dotted form java code sees
#[must_use]
pub fn to_dotted_name(class_name: &str) -> String {
    class_name.replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::{format_field, format_method, to_dotted_name};

    #[test]
    fn test_format() {
        assert_eq!(
            format_method("java/lang/Object", "hashCode", "()I"),
            "java/lang/Object.hashCode()I"
        );
        assert_eq!(format_field("Point", "x", "I"), "Point.x:I");
        assert_eq!(to_dotted_name("java/lang/Object"), "java.lang.Object");
    }
}
