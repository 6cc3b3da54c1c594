use byteorder::WriteBytesExt;

use crate::binary_format::Serialize;

/// Version of the class file, which decides what features the class may use
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}
impl Version {
    /// JDK 1.1
    pub const MIN_MAJOR: u16 = 45;
    /// Java SE 21
    pub const MAX_MAJOR: u16 = 65;

    /// Java SE 8, which is what we emit when building classes
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };

    #[must_use]
    pub fn is_supported(self) -> bool {
        (Version::MIN_MAJOR..=Version::MAX_MAJOR).contains(&self.major_version)
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::Version;

    #[test]
    fn test_supported() {
        let make = |major_version| Version {
            minor_version: 0,
            major_version,
        };
        assert!(!make(44).is_supported());
        assert!(make(45).is_supported());
        assert!(make(52).is_supported());
        assert!(make(65).is_supported());
        assert!(!make(66).is_supported());
    }
}
