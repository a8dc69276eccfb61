//! Timestamp precision of a write request

use std::fmt;

/// Unit of the timestamps carried by a write request
///
/// When a record carries an explicit timestamp literal it is read in this
/// unit. When it does not, the listener stamps it with the current time
/// truncated to this unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    #[default]
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
}

impl Precision {
    /// Map the `precision` query parameter; unknown or empty values fall back
    /// to nanoseconds
    pub fn from_query(value: &str) -> Self {
        match value {
            "us" => Precision::Microsecond,
            "ms" => Precision::Millisecond,
            "s" => Precision::Second,
            _ => Precision::Nanosecond,
        }
    }

    /// Nanoseconds per unit
    pub const fn multiplier(self) -> i64 {
        match self {
            Precision::Nanosecond => 1,
            Precision::Microsecond => 1_000,
            Precision::Millisecond => 1_000_000,
            Precision::Second => 1_000_000_000,
        }
    }

    /// Floor a nanosecond timestamp to this unit
    pub fn truncate(self, timestamp_ns: i64) -> i64 {
        let unit = self.multiplier();
        timestamp_ns.div_euclid(unit) * unit
    }

    /// Convert a literal in this unit to nanoseconds
    pub fn scale(self, literal: i64) -> Option<i64> {
        literal.checked_mul(self.multiplier())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanosecond => "ns",
            Precision::Microsecond => "us",
            Precision::Millisecond => "ms",
            Precision::Second => "s",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
