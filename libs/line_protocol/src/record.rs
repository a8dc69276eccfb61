//! Metric record model

use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// Typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    String(String),
    Boolean(bool),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Unsigned(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

/// One metric point
///
/// Tags and fields are kept sorted so that serialization and equality are
/// independent of the order they appeared on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
}

impl Record {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_tag(key, value);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set a tag, replacing any value already present under the same key
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

/// Serializes back to a single line of line protocol (without newline)
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.name, &[',', ' '])?;
        for (key, value) in &self.tags {
            f.write_char(',')?;
            write_escaped(f, key, &[',', '=', ' '])?;
            f.write_char('=')?;
            write_escaped(f, value, &[',', '=', ' '])?;
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            f.write_char(separator)?;
            separator = ',';
            write_escaped(f, key, &[',', '=', ' '])?;
            f.write_char('=')?;
            match value {
                FieldValue::Float(v) => write!(f, "{}", v)?,
                FieldValue::Integer(v) => write!(f, "{}i", v)?,
                FieldValue::Unsigned(v) => write!(f, "{}u", v)?,
                FieldValue::Boolean(v) => write!(f, "{}", v)?,
                FieldValue::String(v) => {
                    f.write_char('"')?;
                    write_escaped(f, v, &['"', '\\'])?;
                    f.write_char('"')?;
                }
            }
        }

        write!(f, " {}", self.timestamp)
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str, special: &[char]) -> fmt::Result {
    for c in value.chars() {
        if special.contains(&c) {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}
