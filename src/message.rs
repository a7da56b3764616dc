//! APT method interface messages.
//!
//! A message is a header line (`<status> <description>`) followed by zero
//! or more `Name: Value` field lines and a terminating blank line:
//!
//! ```text
//! 600 URI Acquire
//! URI: s3://my-bucket.s3.amazonaws.com/pool/main/h/hello_1.0_all.deb
//! Filename: /var/cache/apt/archives/partial/hello_1.0_all.deb
//!
//! ```
//!
//! APT parses what we send positionally, so [`Message`]'s `Display` output
//! is exact: one space after the status code, `": "` between name and
//! value, fields in their original order, and a trailing blank line.

use std::fmt;

use crate::errors::MethodError;

/// Status codes used by the method interface.
pub mod status {
    pub const CAPABILITIES: i32 = 100;
    pub const LOG: i32 = 101;
    pub const STATUS: i32 = 102;
    pub const URI_START: i32 = 200;
    pub const URI_DONE: i32 = 201;
    pub const URI_FAILURE: i32 = 400;
    pub const GENERAL_FAILURE: i32 = 401;
    pub const URI_ACQUIRE: i32 = 600;
    pub const CONFIGURATION: i32 = 601;
}

/// First line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub status: i32,
    pub description: String,
}

/// A `Name: Value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// A complete message: header plus ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub fields: Vec<Field>,
}

impl Header {
    pub fn new(status: i32, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
        }
    }

    /// Parse `"<status> <description...>"`. The description may be empty.
    fn parse(line: &str) -> Result<Self, MethodError> {
        let mut tokens = line.split_whitespace();
        let code = tokens.next().unwrap_or_default();
        let status = code.parse::<i32>().map_err(|_| MethodError::Parse {
            reason: format!("invalid status {code:?}"),
        })?;
        let description = tokens.collect::<Vec<_>>().join(" ");
        Ok(Self {
            status,
            description,
        })
    }
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Split on the first colon. Never fails: a line without a colon is a
    /// field with an empty value.
    fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.split_once(':') {
            Some((name, value)) => Self::new(name, value.trim()),
            None => Self::new(line, ""),
        }
    }
}

impl Message {
    pub fn new(header: Header, fields: Vec<Field>) -> Self {
        Self { header, fields }
    }

    /// Parse one framed message.
    pub fn parse(raw: &str) -> Result<Self, MethodError> {
        let trimmed = raw.trim();
        let non_empty = trimmed.lines().filter(|l| !l.trim().is_empty()).count();
        if non_empty < 2 {
            return Err(MethodError::Parse {
                reason: format!("expected a header and at least one field, got {non_empty} line(s)"),
            });
        }

        let mut lines = trimmed.lines();
        let header = Header::parse(lines.next().unwrap_or_default())?;
        let fields = lines.map(Field::parse).collect();
        Ok(Self { header, fields })
    }

    /// Value of the first field named `name` (case-sensitive).
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// All fields named `name`, in message order.
    pub fn field_list<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.name == name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.description)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header)?;
        for field in &self.fields {
            writeln!(f, "{field}")?;
        }
        writeln!(f)
    }
}
