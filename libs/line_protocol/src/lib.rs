//! # Line Protocol
//!
//! Record model and incremental parser for the textual metric wire format
//! accepted by the write listener.
//!
//! ## Format
//!
//! ```text
//! measurement[,tag_key=tag_value...] field_key=field_value[,field_key=field_value...] [timestamp]
//! ```
//!
//! - Measurement names escape `,` and space with a backslash.
//! - Tag keys, tag values and field keys escape `,`, `=` and space.
//! - String field values are double quoted and escape `"` and `\`.
//! - Integer fields carry an `i` suffix, unsigned fields a `u` suffix.
//! - The optional timestamp is an integer in the request's [`Precision`].
//!
//! ## Usage
//!
//! ```rust
//! use line_protocol::{Parsed, Precision, StreamParser};
//!
//! let mut parser = StreamParser::new(Precision::Nanosecond, 0);
//! parser.feed(b"cpu_load_short,host=server01 value=12.0 1422568543702900257\n");
//! parser.finish();
//!
//! match parser.next_record() {
//!     Parsed::Record(record) => assert_eq!(record.name, "cpu_load_short"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! assert!(matches!(parser.next_record(), Parsed::EndOfStream));
//! ```

pub mod error;
pub mod parser;
pub mod precision;
pub mod record;

pub use error::{ParseError, ParseErrorKind};
pub use parser::{parse_lines, Parsed, StreamParser};
pub use precision::Precision;
pub use record::{FieldValue, Record};
