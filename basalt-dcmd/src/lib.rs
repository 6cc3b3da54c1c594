//! This library parses the command lines of diagnostic commands.
//! A command line is the command name followed by its arguments, like
//! `VM.class_hierarchy class=java/lang/String verbose`.
//! Arguments are either `name=value` pairs or bare values, which fill the parameters declared
//! positional in order. A bare name of a boolean option sets it to true.
//! Values can be quoted with `"` or `'` to include spaces. There are no escapes.
//!
//! Parsing is purely textual: it turns the text into typed values according to the
//! [`CommandSpec`] and has no other effects.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    /// A signed 64-bit integer
    Int,
    /// `true` or `false`
    Boolean,
    String,
    /// An integer with a time unit, normalized to nanoseconds
    NanoTime,
    /// Comma separated strings
    StringSet,
    /// An integer with an optional `k`/`m`/`g`/`t` suffix, normalized to bytes
    MemorySize,
}
impl ArgumentKind {
    /// The name the kind is shown with in help output
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ArgumentKind::Int => "INT",
            ArgumentKind::Boolean => "BOOLEAN",
            ArgumentKind::String => "STRING",
            ArgumentKind::NanoTime => "NANOTIME",
            ArgumentKind::StringSet => "STRING SET",
            ArgumentKind::MemorySize => "MEMORY SIZE",
        }
    }
}
impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Int(i64),
    Boolean(bool),
    String(String),
    /// Nanoseconds
    NanoTime(i64),
    StringSet(Vec<String>),
    /// Bytes
    MemorySize(u64),
}
impl ArgumentValue {
    #[must_use]
    pub fn kind(&self) -> ArgumentKind {
        match self {
            ArgumentValue::Int(_) => ArgumentKind::Int,
            ArgumentValue::Boolean(_) => ArgumentKind::Boolean,
            ArgumentValue::String(_) => ArgumentKind::String,
            ArgumentValue::NanoTime(_) => ArgumentKind::NanoTime,
            ArgumentValue::StringSet(_) => ArgumentKind::StringSet,
            ArgumentValue::MemorySize(_) => ArgumentKind::MemorySize,
        }
    }
}

/// A parameter of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSpec {
    pub name: String,
    pub description: String,
    pub kind: ArgumentKind,
    pub mandatory: bool,
    /// Text parsed with the same rules as a given value
    pub default: Option<String>,
    /// Whether a bare value can fill it
    pub positional: bool,
}
impl ArgumentSpec {
    /// An optional, named parameter with no default
    #[must_use]
    pub fn new(name: &str, kind: ArgumentKind, description: &str) -> ArgumentSpec {
        ArgumentSpec {
            name: name.to_owned(),
            description: description.to_owned(),
            kind,
            mandatory: false,
            default: None,
            positional: false,
        }
    }

    #[must_use]
    pub fn mandatory(mut self) -> ArgumentSpec {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn positional(mut self) -> ArgumentSpec {
        self.positional = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: &str) -> ArgumentSpec {
        self.default = Some(default.to_owned());
        self
    }
}

/// The name and parameters of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ArgumentSpec>,
}
impl CommandSpec {
    #[must_use]
    pub fn new(name: &str, description: &str) -> CommandSpec {
        CommandSpec {
            name: name.to_owned(),
            description: description.to_owned(),
            arguments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_argument(mut self, argument: ArgumentSpec) -> CommandSpec {
        self.arguments.push(argument);
        self
    }

    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|argument| argument.name == name)
    }

    /// The usage line, like `VM.class_hierarchy class=<STRING> [verbose=<BOOLEAN>]`
    #[must_use]
    pub fn syntax(&self) -> String {
        let mut syntax = self.name.clone();
        for argument in &self.arguments {
            let part = if argument.positional {
                format!("<{}>", argument.name)
            } else {
                format!("{}=<{}>", argument.name, argument.kind)
            };
            syntax.push(' ');
            if argument.mandatory {
                syntax.push_str(&part);
            } else {
                syntax.push('[');
                syntax.push_str(&part);
                syntax.push(']');
            }
        }
        syntax
    }
}

/// The parsed values of a command line, in parameter declaration order.
/// Parameters that were not given and have no default are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentValues {
    values: Vec<(String, ArgumentValue)>,
}
impl ArgumentValues {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.values
            .iter()
            .find(|(value_name, _)| value_name == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgumentValue::String(value)) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ArgumentValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Absent booleans are false
    #[must_use]
    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.get(name), Some(ArgumentValue::Boolean(true)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgumentValue)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DcmdParseError {
    #[error("empty command line")]
    EmptyCommandLine,
    #[error("unterminated quote in the command line")]
    UnterminatedQuote,
    #[error("missing argument name before '='")]
    MissingArgumentName,
    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
    #[error("duplicate argument '{0}'")]
    DuplicateArgument(String),
    #[error("too many arguments, unexpected '{0}'")]
    TooManyArguments(String),
    #[error("argument '{0}' is mandatory but was not given")]
    MissingArgument(String),
    #[error("invalid value for argument '{name}' of type {kind}: '{value}': {reason}")]
    InvalidValue {
        name: String,
        kind: ArgumentKind,
        value: String,
        reason: &'static str,
    },
}

/// Split a command line into the command name and the text of its arguments
pub fn split_command_name(line: &str) -> Result<(&str, &str), DcmdParseError> {
    let line = line.trim_start();
    if line.is_empty() {
        return Err(DcmdParseError::EmptyCommandLine);
    }
    let end = line.find(char::is_whitespace).unwrap_or(line.len());
    Ok((&line[..end], &line[end..]))
}

/// A single argument as written
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Named(&'a str, &'a str),
    Bare(&'a str),
}

fn tokenize(mut data: &str) -> Result<Vec<Token<'_>>, DcmdParseError> {
    let mut tokens = Vec::new();
    loop {
        data = data.trim_start();
        if data.is_empty() {
            return Ok(tokens);
        }

        let (rest, token) = parse_token(data)?;
        tokens.push(token);
        data = rest;
    }
}

/// Returns (data, token)
fn parse_token(data: &str) -> Result<(&str, Token<'_>), DcmdParseError> {
    // A quoted bare value
    if data.starts_with(['"', '\'']) {
        let (rest, value) = parse_value(data)?;
        return Ok((rest, Token::Bare(value)));
    }

    let name_end = data
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(data.len());
    let (name, rest) = data.split_at(name_end);
    match rest.strip_prefix('=') {
        Some(rest) => {
            if name.is_empty() {
                return Err(DcmdParseError::MissingArgumentName);
            }
            let (rest, value) = parse_value(rest)?;
            Ok((rest, Token::Named(name, value)))
        }
        None => Ok((rest, Token::Bare(name))),
    }
}

/// Parse a possibly quoted value. Returns (data, value)
fn parse_value(data: &str) -> Result<(&str, &str), DcmdParseError> {
    if let Some(quote) = data.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let inner = &data[1..];
        let end = inner.find(quote).ok_or(DcmdParseError::UnterminatedQuote)?;
        return Ok((&inner[end + 1..], &inner[..end]));
    }

    let end = data.find(char::is_whitespace).unwrap_or(data.len());
    Ok((&data[end..], &data[..end]))
}

/// Parse the arguments of a command, the text after the command name
pub fn parse(arguments: &str, spec: &CommandSpec) -> Result<ArgumentValues, DcmdParseError> {
    let tokens = tokenize(arguments)?;

    let mut given: Vec<Option<ArgumentValue>> = vec![None; spec.arguments.len()];
    let mut positional = spec
        .arguments
        .iter()
        .enumerate()
        .filter(|(_, argument)| argument.positional)
        .map(|(i, _)| i);

    for token in tokens {
        let (index, text) = match token {
            Token::Named(name, value) => {
                let index = position_of(spec, name)?;
                (index, value)
            }
            Token::Bare(value) => {
                let flag = spec.arguments.iter().position(|argument| {
                    !argument.positional
                        && argument.kind == ArgumentKind::Boolean
                        && argument.name == value
                });
                if let Some(index) = flag {
                    (index, "true")
                } else {
                    // Named parameters can't be skipped over by later bare values, so an
                    // earlier `name=value` for a positional parameter is left in place
                    let index = positional
                        .find(|i| given[*i].is_none())
                        .ok_or_else(|| DcmdParseError::TooManyArguments(value.to_owned()))?;
                    (index, value)
                }
            }
        };

        let argument = &spec.arguments[index];
        if given[index].is_some() {
            return Err(DcmdParseError::DuplicateArgument(argument.name.clone()));
        }
        given[index] = Some(parse_argument_value(argument, text)?);
    }

    let mut values = Vec::new();
    for (argument, value) in spec.arguments.iter().zip(given) {
        let value = match (value, &argument.default) {
            (Some(value), _) => value,
            (None, Some(default)) => parse_argument_value(argument, default)?,
            (None, None) if argument.mandatory => {
                return Err(DcmdParseError::MissingArgument(argument.name.clone()))
            }
            (None, None) => continue,
        };
        values.push((argument.name.clone(), value));
    }

    Ok(ArgumentValues { values })
}

fn position_of(spec: &CommandSpec, name: &str) -> Result<usize, DcmdParseError> {
    spec.arguments
        .iter()
        .position(|argument| argument.name == name)
        .ok_or_else(|| DcmdParseError::UnknownArgument(name.to_owned()))
}

fn parse_argument_value(
    argument: &ArgumentSpec,
    text: &str,
) -> Result<ArgumentValue, DcmdParseError> {
    let invalid = |reason| DcmdParseError::InvalidValue {
        name: argument.name.clone(),
        kind: argument.kind,
        value: text.to_owned(),
        reason,
    };

    Ok(match argument.kind {
        ArgumentKind::Int => {
            ArgumentValue::Int(text.parse().map_err(|_| invalid("not an integer"))?)
        }
        ArgumentKind::Boolean => match text {
            "true" => ArgumentValue::Boolean(true),
            "false" => ArgumentValue::Boolean(false),
            _ => return Err(invalid("expected true or false")),
        },
        ArgumentKind::String => ArgumentValue::String(text.to_owned()),
        ArgumentKind::NanoTime => ArgumentValue::NanoTime(parse_nanotime(text).map_err(invalid)?),
        ArgumentKind::StringSet => ArgumentValue::StringSet(
            text.split(',')
                .filter(|part| !part.is_empty())
                .map(str::to_owned)
                .collect(),
        ),
        ArgumentKind::MemorySize => {
            ArgumentValue::MemorySize(parse_memory_size(text).map_err(invalid)?)
        }
    })
}

/// Split the leading integer, with an optional sign, from its suffix
fn split_number(text: &str) -> (&str, &str) {
    let digits_start = usize::from(text.starts_with(['-', '+']));
    let end = text[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(text.len(), |i| i + digits_start);
    text.split_at(end)
}

fn parse_nanotime(text: &str) -> Result<i64, &'static str> {
    let (number, unit) = split_number(text);
    let value: i64 = number.parse().map_err(|_| "not an integer with a time unit")?;
    let scale: i64 = match unit {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        "d" => 24 * 60 * 60 * 1_000_000_000,
        // Zero is the same in any unit
        "" if value == 0 => 1,
        "" => return Err("missing time unit"),
        _ => return Err("unknown time unit, expected ns, us, ms, s, m, h or d"),
    };
    value.checked_mul(scale).ok_or("value is too large")
}

fn parse_memory_size(text: &str) -> Result<u64, &'static str> {
    let (number, suffix) = split_number(text);
    if number.starts_with('-') {
        return Err("memory sizes can't be negative");
    }
    let value: u64 = number.parse().map_err(|_| "not a memory size")?;
    let shift = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        _ => return Err("unknown size suffix, expected k, m, g or t"),
    };
    value.checked_mul(1 << shift).ok_or("value is too large")
}

#[cfg(test)]
mod tests {
    use crate::{
        parse, parse_memory_size, parse_nanotime, split_command_name, tokenize, ArgumentKind,
        ArgumentSpec, ArgumentValue, CommandSpec, DcmdParseError, Token,
    };

    fn hierarchy_spec() -> CommandSpec {
        CommandSpec::new("VM.class_hierarchy", "Print a class hierarchy")
            .with_argument(
                ArgumentSpec::new("class", ArgumentKind::String, "The class name").mandatory(),
            )
            .with_argument(ArgumentSpec::new(
                "verbose",
                ArgumentKind::Boolean,
                "Print more",
            ))
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize(r#"a=1 b="x y" bare 'quoted bare'"#),
            Ok(vec![
                Token::Named("a", "1"),
                Token::Named("b", "x y"),
                Token::Bare("bare"),
                Token::Bare("quoted bare"),
            ])
        );
        assert_eq!(tokenize("  "), Ok(Vec::new()));
        assert_eq!(tokenize("a=\"x"), Err(DcmdParseError::UnterminatedQuote));
        assert_eq!(tokenize("=x"), Err(DcmdParseError::MissingArgumentName));
    }

    #[test]
    fn test_mandatory_string() {
        let spec = hierarchy_spec();

        let err = parse("", &spec).unwrap_err();
        assert_eq!(err, DcmdParseError::MissingArgument("class".to_owned()));
        assert!(err.to_string().contains("class"));

        let values = parse("class=java/lang/String", &spec).unwrap();
        assert_eq!(values.get_str("class"), Some("java/lang/String"));
        assert!(!values.get_bool("verbose"));
        assert_eq!(values.len(), 1);

        // Spaces survive inside quotes
        let values = parse("class=\"some thing\" verbose", &spec).unwrap();
        assert_eq!(values.get_str("class"), Some("some thing"));
        assert!(values.get_bool("verbose"));
    }

    #[test]
    fn test_errors() {
        let spec = hierarchy_spec();
        assert_eq!(
            parse("class=A nope=1", &spec),
            Err(DcmdParseError::UnknownArgument("nope".to_owned()))
        );
        assert_eq!(
            parse("class=A class=B", &spec),
            Err(DcmdParseError::DuplicateArgument("class".to_owned()))
        );
        assert_eq!(
            parse("class=A extra", &spec),
            Err(DcmdParseError::TooManyArguments("extra".to_owned()))
        );
        assert!(matches!(
            parse("class=A verbose=yes", &spec),
            Err(DcmdParseError::InvalidValue {
                kind: ArgumentKind::Boolean,
                ..
            })
        ));
    }

    #[test]
    fn test_positional_and_defaults() {
        let spec = CommandSpec::new("GC.run_for", "")
            .with_argument(ArgumentSpec::new("target", ArgumentKind::String, "").positional())
            .with_argument(
                ArgumentSpec::new("count", ArgumentKind::Int, "")
                    .positional()
                    .with_default("10"),
            )
            .with_argument(
                ArgumentSpec::new("interval", ArgumentKind::NanoTime, "").with_default("5ms"),
            )
            .with_argument(ArgumentSpec::new("limit", ArgumentKind::MemorySize, ""))
            .with_argument(ArgumentSpec::new("tags", ArgumentKind::StringSet, ""));

        let values = parse("heap -3 limit=2m tags=a,b", &spec).unwrap();
        assert_eq!(values.get_str("target"), Some("heap"));
        assert_eq!(values.get_int("count"), Some(-3));
        assert_eq!(values.get("interval"), Some(&ArgumentValue::NanoTime(5_000_000)));
        assert_eq!(values.get("limit"), Some(&ArgumentValue::MemorySize(2 << 20)));
        assert_eq!(
            values.get("tags"),
            Some(&ArgumentValue::StringSet(vec!["a".to_owned(), "b".to_owned()]))
        );

        let values = parse("count=4 heap", &spec).unwrap();
        assert_eq!(values.get_str("target"), Some("heap"));
        assert_eq!(values.get_int("count"), Some(4));
        assert!(values.get("limit").is_none());
    }

    #[test]
    fn test_units() {
        assert_eq!(parse_nanotime("0"), Ok(0));
        assert_eq!(parse_nanotime("2s"), Ok(2_000_000_000));
        assert_eq!(parse_nanotime("1d"), Ok(86_400_000_000_000));
        assert!(parse_nanotime("3").is_err());
        assert!(parse_nanotime("3w").is_err());
        assert!(parse_nanotime("999999999999d").is_err());

        assert_eq!(parse_memory_size("512"), Ok(512));
        assert_eq!(parse_memory_size("4K"), Ok(4096));
        assert_eq!(parse_memory_size("1g"), Ok(1 << 30));
        assert!(parse_memory_size("-1k").is_err());
        assert!(parse_memory_size("1q").is_err());
    }

    #[test]
    fn test_command_name() {
        assert_eq!(split_command_name("  VM.version"), Ok(("VM.version", "")));
        assert_eq!(
            split_command_name("VM.class_hierarchy class=A"),
            Ok(("VM.class_hierarchy", " class=A"))
        );
        assert_eq!(split_command_name(" "), Err(DcmdParseError::EmptyCommandLine));
        assert_eq!(
            hierarchy_spec().syntax(),
            "VM.class_hierarchy class=<STRING> [verbose=<BOOLEAN>]"
        );
    }
}
