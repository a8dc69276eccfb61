//! Parse errors for line-protocol records

use std::fmt;
use thiserror::Error;

/// Longest slice of the offending line echoed back in an error message
pub const MAX_ERROR_BUFFER_SIZE: usize = 1024;

/// What the parser expected when it gave up on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    ExpectedMeasurement,
    ExpectedTag,
    ExpectedField,
    ExpectedTimestamp,
    ValueOutOfRange,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::ExpectedMeasurement => "expected measurement name",
            ParseErrorKind::ExpectedTag => "expected tag",
            ParseErrorKind::ExpectedField => "expected field",
            ParseErrorKind::ExpectedTimestamp => "expected timestamp",
            ParseErrorKind::ValueOutOfRange => "value out of range",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single malformed record
///
/// Carries the physical line number and 1-based column at which parsing
/// failed, plus the (possibly abbreviated) text of the line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("metric parse error: {kind} at {line}:{column}: \"{buffer}\"")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
    pub buffer: String,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, line: usize, column: usize, text: &[u8]) -> Self {
        Self {
            kind,
            line,
            column,
            buffer: error_buffer(text, column),
        }
    }
}

/// Abbreviate long lines to the bytes leading up to the failure point
fn error_buffer(text: &[u8], column: usize) -> String {
    if text.len() <= MAX_ERROR_BUFFER_SIZE {
        return String::from_utf8_lossy(text).into_owned();
    }

    let end = column.saturating_sub(1).min(text.len());
    let start = end.saturating_sub(MAX_ERROR_BUFFER_SIZE);
    format!("...{}<-- here", String::from_utf8_lossy(&text[start..end]))
}
