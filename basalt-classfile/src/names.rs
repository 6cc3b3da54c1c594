//! Rules for the names that appear in class files

/// An unqualified name, as used for fields and methods.
/// Method names additionally may not contain `<` or `>`, except for the two special methods.
#[must_use]
pub fn is_valid_unqualified_name(name: &str, is_method: bool) -> bool {
    if is_method && (name == "<init>" || name == "<clinit>") {
        return true;
    }

    !name.is_empty()
        && !name.contains(|c| {
            matches!(c, '.' | ';' | '[' | '/') || (is_method && matches!(c, '<' | '>'))
        })
}

/// A class or interface name in internal form: unqualified names separated by `/`
#[must_use]
pub fn is_valid_binary_class_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('/')
            .all(|part| is_valid_unqualified_name(part, false))
}

/// The package portion of a class name in internal form, with array types and descriptors
/// reduced to their element class. Classes in the unnamed package have an empty package.
#[must_use]
pub fn package_of(class_name: &str) -> &str {
    let name = class_name.trim_start_matches('[');
    let name = name
        .strip_prefix('L')
        .and_then(|x| x.strip_suffix(';'))
        .unwrap_or(name);
    match name.rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::{is_valid_binary_class_name, is_valid_unqualified_name, package_of};

    #[test]
    fn test_names() {
        assert!(is_valid_unqualified_name("value", false));
        assert!(is_valid_unqualified_name("<init>", true));
        assert!(!is_valid_unqualified_name("<init>", false));
        assert!(!is_valid_unqualified_name("a<b", true));
        assert!(!is_valid_unqualified_name("a.b", false));
        assert!(!is_valid_unqualified_name("", false));

        assert!(is_valid_binary_class_name("java/lang/Object"));
        assert!(is_valid_binary_class_name("Main"));
        assert!(!is_valid_binary_class_name("java//Object"));
        assert!(!is_valid_binary_class_name("/Object"));
        assert!(!is_valid_binary_class_name("java.lang.Object"));
    }

    #[test]
    fn test_package() {
        assert_eq!(package_of("java/lang/Object"), "java/lang");
        assert_eq!(package_of("Main"), "");
        assert_eq!(package_of("[[Ljava/util/List;"), "java/util");
        assert_eq!(package_of("[I"), "");
    }
}
