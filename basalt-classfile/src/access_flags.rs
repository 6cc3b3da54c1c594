use bitflags::bitflags;
use byteorder::WriteBytesExt;

use crate::{binary_format::Serialize, version::Version};

bitflags! {
    /// Access flags on classes
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags on fields
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Access flags on methods
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

impl Serialize for ClassAccessFlags {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

impl Serialize for FieldAccessFlags {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

impl Serialize for MethodAccessFlags {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

/// Whether at most one of the bits in `flags` is set
fn at_most_one(flags: u16) -> bool {
    flags.count_ones() <= 1
}

#[must_use]
pub fn is_legal_class_flags(flags: ClassAccessFlags) -> bool {
    if flags.contains(ClassAccessFlags::MODULE) {
        // Module descriptors are not classes that can be loaded
        return false;
    }

    if flags.contains(ClassAccessFlags::INTERFACE) {
        flags.contains(ClassAccessFlags::ABSTRACT)
            && !flags.intersects(
                ClassAccessFlags::FINAL | ClassAccessFlags::SUPER | ClassAccessFlags::ENUM,
            )
    } else {
        !flags.contains(ClassAccessFlags::ANNOTATION)
            && !flags.contains(ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT)
    }
}

#[must_use]
pub fn is_legal_field_flags(class_flags: ClassAccessFlags, flags: FieldAccessFlags) -> bool {
    if class_flags.contains(ClassAccessFlags::INTERFACE) {
        let required =
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        let allowed = required | FieldAccessFlags::SYNTHETIC;
        return flags.contains(required) && allowed.contains(flags);
    }

    let visibility = flags
        & (FieldAccessFlags::PUBLIC | FieldAccessFlags::PRIVATE | FieldAccessFlags::PROTECTED);
    at_most_one(visibility.bits())
        && !flags.contains(FieldAccessFlags::FINAL | FieldAccessFlags::VOLATILE)
}

#[must_use]
pub fn is_legal_method_flags(
    class_flags: ClassAccessFlags,
    version: Version,
    name: &str,
    flags: MethodAccessFlags,
) -> bool {
    let is_interface = class_flags.contains(ClassAccessFlags::INTERFACE);

    if name == "<clinit>" {
        // Other flags on a class initializer are ignored
        return version.major_version < 51 || flags.contains(MethodAccessFlags::STATIC);
    }

    let visibility = flags
        & (MethodAccessFlags::PUBLIC | MethodAccessFlags::PRIVATE | MethodAccessFlags::PROTECTED);
    if !at_most_one(visibility.bits()) {
        return false;
    }

    if name == "<init>" {
        let disallowed = MethodAccessFlags::STATIC
            | MethodAccessFlags::FINAL
            | MethodAccessFlags::SYNCHRONIZED
            | MethodAccessFlags::NATIVE
            | MethodAccessFlags::ABSTRACT
            | MethodAccessFlags::BRIDGE;
        return !is_interface && !flags.intersects(disallowed);
    }

    if is_interface {
        if version.major_version < 52 {
            let required = MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT;
            let allowed = required
                | MethodAccessFlags::BRIDGE
                | MethodAccessFlags::VARARGS
                | MethodAccessFlags::SYNTHETIC;
            if !flags.contains(required) || !allowed.contains(flags) {
                return false;
            }
        } else {
            let disallowed = MethodAccessFlags::PROTECTED
                | MethodAccessFlags::FINAL
                | MethodAccessFlags::SYNCHRONIZED
                | MethodAccessFlags::NATIVE;
            if flags.intersects(disallowed) || visibility.is_empty() {
                return false;
            }
        }
    }

    if flags.contains(MethodAccessFlags::ABSTRACT) {
        let mut disallowed = MethodAccessFlags::PRIVATE
            | MethodAccessFlags::STATIC
            | MethodAccessFlags::FINAL
            | MethodAccessFlags::SYNCHRONIZED
            | MethodAccessFlags::NATIVE;
        if (46..=60).contains(&version.major_version) {
            disallowed |= MethodAccessFlags::STRICT;
        }
        if flags.intersects(disallowed) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use crate::version::Version;

    use super::{
        is_legal_class_flags, is_legal_field_flags, is_legal_method_flags, ClassAccessFlags,
        FieldAccessFlags, MethodAccessFlags,
    };

    #[test]
    fn test_class_flags() {
        assert!(is_legal_class_flags(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
        ));
        assert!(is_legal_class_flags(
            ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
        ));
        assert!(!is_legal_class_flags(ClassAccessFlags::INTERFACE));
        assert!(!is_legal_class_flags(
            ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT
        ));
        assert!(!is_legal_class_flags(
            ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT | ClassAccessFlags::FINAL
        ));
        assert!(!is_legal_class_flags(ClassAccessFlags::ANNOTATION));
    }

    #[test]
    fn test_field_flags() {
        let class = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        assert!(is_legal_field_flags(
            class,
            FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL
        ));
        assert!(!is_legal_field_flags(
            class,
            FieldAccessFlags::FINAL | FieldAccessFlags::VOLATILE
        ));
        assert!(!is_legal_field_flags(
            class,
            FieldAccessFlags::PUBLIC | FieldAccessFlags::PRIVATE
        ));

        let interface = ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        assert!(is_legal_field_flags(
            interface,
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL
        ));
        assert!(!is_legal_field_flags(
            interface,
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC
        ));
    }

    #[test]
    fn test_method_flags() {
        let class = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let interface = ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        let v8 = Version::JAVA8;

        assert!(is_legal_method_flags(
            class,
            v8,
            "run",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT
        ));
        assert!(!is_legal_method_flags(
            class,
            v8,
            "run",
            MethodAccessFlags::PRIVATE | MethodAccessFlags::ABSTRACT
        ));
        assert!(!is_legal_method_flags(
            class,
            v8,
            "run",
            MethodAccessFlags::STATIC | MethodAccessFlags::ABSTRACT
        ));
        assert!(!is_legal_method_flags(
            class,
            v8,
            "<init>",
            MethodAccessFlags::STATIC
        ));
        assert!(is_legal_method_flags(
            class,
            v8,
            "<clinit>",
            MethodAccessFlags::STATIC
        ));

        // Default methods
        assert!(is_legal_method_flags(
            interface,
            v8,
            "m",
            MethodAccessFlags::PUBLIC
        ));
        assert!(!is_legal_method_flags(
            interface,
            v8,
            "m",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::SYNCHRONIZED
        ));
        assert!(!is_legal_method_flags(
            interface,
            v8,
            "m",
            MethodAccessFlags::empty()
        ));
        assert!(!is_legal_method_flags(
            interface,
            Version {
                minor_version: 0,
                major_version: 51
            },
            "m",
            MethodAccessFlags::PUBLIC
        ));
    }
}
