use std::fmt;

use thiserror::Error;

use crate::names;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("unexpected end of descriptor")]
    UnexpectedEnd,
    #[error("unknown type character '{0}'")]
    UnknownType(char),
    #[error("unterminated class name")]
    UnterminatedClassName,
    #[error("invalid class name \"{0}\"")]
    InvalidClassName(String),
    #[error("more than 255 array dimensions")]
    TooManyDimensions,
    #[error("trailing characters after descriptor")]
    TrailingData,
    #[error("method descriptor must begin with '('")]
    MissingParenthesis,
    #[error("void is only allowed as a return type")]
    VoidNotAllowed,
    #[error("parameters take more than 255 slots")]
    TooManyParameters,
}

/// The maximum number of array dimensions a type may have
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// A class in its internal form, like `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}
impl FieldType {
    pub fn parse(text: &str) -> Result<FieldType, DescriptorError> {
        let (typ, rest) = FieldType::parse_prefix(text)?;
        if rest.is_empty() {
            Ok(typ)
        } else {
            Err(DescriptorError::TrailingData)
        }
    }

    /// Parse a single field type off the front of `text`
    fn parse_prefix(text: &str) -> Result<(FieldType, &str), DescriptorError> {
        let dimensions = text.bytes().take_while(|x| *x == b'[').count();
        if dimensions > MAX_ARRAY_DIMENSIONS {
            return Err(DescriptorError::TooManyDimensions);
        }

        let text = &text[dimensions..];
        let first = text.chars().next().ok_or(DescriptorError::UnexpectedEnd)?;
        let rest = &text[first.len_utf8()..];
        let (mut typ, rest) = match first {
            'B' => (FieldType::Byte, rest),
            'C' => (FieldType::Char, rest),
            'D' => (FieldType::Double, rest),
            'F' => (FieldType::Float, rest),
            'I' => (FieldType::Int, rest),
            'J' => (FieldType::Long, rest),
            'S' => (FieldType::Short, rest),
            'Z' => (FieldType::Boolean, rest),
            'L' => {
                let end = rest
                    .find(';')
                    .ok_or(DescriptorError::UnterminatedClassName)?;
                let name = &rest[..end];
                if !names::is_valid_binary_class_name(name) {
                    return Err(DescriptorError::InvalidClassName(name.to_owned()));
                }
                (FieldType::Object(name.to_owned()), &rest[end + 1..])
            }
            'V' => return Err(DescriptorError::VoidNotAllowed),
            c => return Err(DescriptorError::UnknownType(c)),
        };

        for _ in 0..dimensions {
            typ = FieldType::Array(Box::new(typ));
        }

        Ok((typ, rest))
    }

    /// Whether this type takes two slots of locals or operand stack
    #[must_use]
    pub fn is_category_2(&self) -> bool {
        matches!(self, FieldType::Long | FieldType::Double)
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// The name of the class this type refers to.
    /// Array classes are named by their descriptor, like `[I` or `[Ljava/lang/String;`
    #[must_use]
    pub fn class_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_string()),
            _ => None,
        }
    }

    /// Parse the name of a class as it appears in a Class constant, where array classes are
    /// written as descriptors and everything else is a plain internal name.
    pub fn from_class_name(name: &str) -> Result<FieldType, DescriptorError> {
        if name.starts_with('[') {
            FieldType::parse(name)
        } else if names::is_valid_binary_class_name(name) {
            Ok(FieldType::Object(name.to_owned()))
        } else {
            Err(DescriptorError::InvalidClassName(name.to_owned()))
        }
    }
}
impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(component) => write!(f, "[{}", component),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    /// `None` is void
    pub return_type: Option<FieldType>,
}
impl MethodDescriptor {
    pub fn parse(text: &str) -> Result<MethodDescriptor, DescriptorError> {
        let mut rest = text
            .strip_prefix('(')
            .ok_or(DescriptorError::MissingParenthesis)?;

        let mut parameters = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }

            let (param, after) = FieldType::parse_prefix(rest)?;
            parameters.push(param);
            rest = after;
        }

        let return_type = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest)?)
        };

        let descriptor = MethodDescriptor {
            parameters,
            return_type,
        };
        // `this` is not counted here, it is checked against max_locals once we know the method's
        // flags
        if descriptor.parameter_slots() > 255 {
            return Err(DescriptorError::TooManyParameters);
        }

        Ok(descriptor)
    }

    /// The number of local variable slots the parameters take
    #[must_use]
    pub fn parameter_slots(&self) -> usize {
        self.parameters
            .iter()
            .map(|x| if x.is_category_2() { 2 } else { 1 })
            .sum()
    }
}
impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.parameters {
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        match &self.return_type {
            Some(ret) => write!(f, "{}", ret),
            None => f.write_str("V"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DescriptorError, FieldType, MethodDescriptor};

    #[test]
    fn test_field_type() {
        assert_eq!(FieldType::parse("I"), Ok(FieldType::Int));
        assert_eq!(
            FieldType::parse("[[Ljava/lang/String;"),
            Ok(FieldType::Array(Box::new(FieldType::Array(Box::new(
                FieldType::Object("java/lang/String".to_owned())
            )))))
        );
        assert_eq!(FieldType::parse("V"), Err(DescriptorError::VoidNotAllowed));
        assert_eq!(FieldType::parse("II"), Err(DescriptorError::TrailingData));
        assert_eq!(
            FieldType::parse("Ljava/lang/String"),
            Err(DescriptorError::UnterminatedClassName)
        );
        assert_eq!(
            FieldType::parse("L;"),
            Err(DescriptorError::InvalidClassName(String::new()))
        );
        assert_eq!(FieldType::parse(""), Err(DescriptorError::UnexpectedEnd));
        assert_eq!(FieldType::parse("Q"), Err(DescriptorError::UnknownType('Q')));

        let deep = "[".repeat(256) + "I";
        assert_eq!(
            FieldType::parse(&deep),
            Err(DescriptorError::TooManyDimensions)
        );
    }

    #[test]
    fn test_method_descriptor() {
        let desc = MethodDescriptor::parse("(IJLjava/lang/Object;[D)V").unwrap();
        assert_eq!(desc.parameters.len(), 4);
        assert_eq!(desc.parameter_slots(), 5);
        assert_eq!(desc.return_type, None);
        assert_eq!(desc.to_string(), "(IJLjava/lang/Object;[D)V");

        let desc = MethodDescriptor::parse("()Ljava/lang/String;").unwrap();
        assert!(desc.parameters.is_empty());
        assert_eq!(
            desc.return_type,
            Some(FieldType::Object("java/lang/String".to_owned()))
        );

        assert_eq!(
            MethodDescriptor::parse("I)V"),
            Err(DescriptorError::MissingParenthesis)
        );
        assert_eq!(
            MethodDescriptor::parse("(V)V"),
            Err(DescriptorError::VoidNotAllowed)
        );
        assert_eq!(
            MethodDescriptor::parse("(I"),
            Err(DescriptorError::UnexpectedEnd)
        );
    }

    #[test]
    fn test_class_name() {
        assert_eq!(
            FieldType::from_class_name("[I").unwrap().class_name(),
            Some("[I".to_owned())
        );
        assert_eq!(
            FieldType::from_class_name("a/B"),
            Ok(FieldType::Object("a/B".to_owned()))
        );
        assert!(FieldType::from_class_name("a//B").is_err());
    }
}
