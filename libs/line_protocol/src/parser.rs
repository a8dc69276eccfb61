//! Incremental line-protocol parser
//!
//! [`StreamParser`] is fed bytes as they arrive and hands back one record at a
//! time. A malformed record does not poison the stream: the parser reports it
//! and resumes at the next line, so callers can keep every valid record from a
//! partially broken body.

use crate::error::{ParseError, ParseErrorKind};
use crate::precision::Precision;
use crate::record::{FieldValue, Record};

/// Consumed prefix size above which the internal buffer is compacted
const COMPACT_THRESHOLD: usize = 64 * 1024;

const SERIES_ESCAPES: &[u8] = b", ";
const KEY_ESCAPES: &[u8] = b",= ";

/// Outcome of a single pull from the parser
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Record(Record),
    Malformed(ParseError),
    /// More input is needed before the next record can be produced
    Incomplete,
    /// Input was finished and fully consumed
    EndOfStream,
}

/// Push-fed, pull-read parser over a byte stream
#[derive(Debug)]
pub struct StreamParser {
    buf: Vec<u8>,
    pos: usize,
    consumed: u64,
    line: usize,
    finished: bool,
    scan: LineScan,
    precision: Precision,
    default_timestamp: i64,
}

impl StreamParser {
    /// `default_timestamp` (ns) is assigned to records without a timestamp literal
    pub fn new(precision: Precision, default_timestamp: i64) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            consumed: 0,
            line: 1,
            finished: false,
            scan: LineScan::new(),
            precision,
            default_timestamp,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(data);
    }

    /// Mark the end of input; a trailing line without newline becomes parseable
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.consumed
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn next_record(&mut self) -> Parsed {
        loop {
            let rest = &self.buf[self.pos..];
            if rest.is_empty() {
                return if self.finished {
                    Parsed::EndOfStream
                } else {
                    Parsed::Incomplete
                };
            }

            let (len, advance) = match self.scan.find_end(rest) {
                Some(end) => (end, end + 1),
                None if self.finished => (rest.len(), rest.len()),
                None => return Parsed::Incomplete,
            };
            self.scan = LineScan::new();

            let start = self.pos;
            let end = start + len;
            let line_number = self.line;
            let newlines = self.buf[start..end].iter().filter(|&&b| b == b'\n').count();

            self.pos += advance;
            self.consumed += advance as u64;
            self.line += newlines + usize::from(advance > len);

            let mut line = &self.buf[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let lead = line
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t'))
                .count();
            let body = &line[lead..];
            if body.is_empty() || body[0] == b'#' {
                continue;
            }

            return match parse_line(body, self.precision, self.default_timestamp) {
                Ok(record) => Parsed::Record(record),
                Err((kind, index)) => {
                    Parsed::Malformed(ParseError::new(kind, line_number, lead + index + 1, line))
                }
            };
        }
    }

    fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos >= COMPACT_THRESHOLD || self.pos * 2 >= self.buf.len() {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

/// Parse a complete buffer, separating records from malformed lines
pub fn parse_lines(
    input: &[u8],
    precision: Precision,
    default_timestamp: i64,
) -> (Vec<Record>, Vec<ParseError>) {
    let mut parser = StreamParser::new(precision, default_timestamp);
    parser.feed(input);
    parser.finish();

    let mut records = Vec::new();
    let mut errors = Vec::new();
    loop {
        match parser.next_record() {
            Parsed::Record(record) => records.push(record),
            Parsed::Malformed(err) => errors.push(err),
            Parsed::Incomplete | Parsed::EndOfStream => break,
        }
    }
    (records, errors)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Leading blanks before the first byte of the record
    Lead,
    Comment,
    Series,
    Fields,
    Timestamp,
}

/// Resumable search for the newline ending the record at the front of the buffer
///
/// Bytes examined by an earlier call are not scanned again, so a long record
/// arriving in many small chunks costs time linear in its length.
#[derive(Debug, Clone, Copy)]
struct LineScan {
    /// Next byte to examine, relative to the start of the record
    index: usize,
    state: ScanState,
    in_quote: bool,
    after_equals: bool,
}

impl LineScan {
    const fn new() -> Self {
        Self {
            index: 0,
            state: ScanState::Lead,
            in_quote: false,
            after_equals: false,
        }
    }

    /// Newlines inside quoted string field values do not terminate a record.
    fn find_end(&mut self, buf: &[u8]) -> Option<usize> {
        let mut i = self.index;

        let found = loop {
            let Some(&b) = buf.get(i) else { break None };

            match self.state {
                ScanState::Lead => {
                    if matches!(b, b' ' | b'\t') {
                        i += 1;
                    } else if b == b'#' {
                        self.state = ScanState::Comment;
                    } else {
                        self.state = ScanState::Series;
                    }
                    continue;
                }
                ScanState::Comment => {
                    if b == b'\n' {
                        break Some(i);
                    }
                    i += 1;
                    continue;
                }
                _ => {}
            }

            if self.in_quote {
                match b {
                    b'\\' => i += 1,
                    b'"' => self.in_quote = false,
                    _ => {}
                }
                i += 1;
                continue;
            }

            match b {
                b'\n' => break Some(i),
                b'\\' => match buf.get(i + 1) {
                    // escaped byte not here yet
                    None => break None,
                    Some(b' ' | b',' | b'=') => {
                        i += 2;
                        self.after_equals = false;
                        continue;
                    }
                    Some(_) => {}
                },
                b' ' if self.state == ScanState::Series => self.state = ScanState::Fields,
                b' ' if self.state == ScanState::Fields => self.state = ScanState::Timestamp,
                b'"' if self.state == ScanState::Fields && self.after_equals => self.in_quote = true,
                _ => {}
            }
            self.after_equals = b == b'=' && self.state == ScanState::Fields;
            i += 1;
        };

        self.index = i;
        found
    }
}

type LineResult<T> = Result<T, (ParseErrorKind, usize)>;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Read up to an unescaped stop byte; `\x` collapses to `x` only for escapable `x`
    fn read_escaped(&mut self, stops: &[u8], escapable: &[u8]) -> String {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'\\' {
                if let Some(next) = self.buf.get(self.pos + 1) {
                    if escapable.contains(next) {
                        out.push(*next);
                        self.pos += 2;
                        continue;
                    }
                }
                out.push(b);
                self.pos += 1;
                continue;
            }
            if stops.contains(&b) {
                break;
            }
            out.push(b);
            self.pos += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn read_until(&mut self, stops: &[u8]) -> &'a [u8] {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        &self.buf[start..self.pos]
    }
}

fn parse_line(line: &[u8], precision: Precision, default_timestamp: i64) -> LineResult<Record> {
    let mut cur = Cursor { buf: line, pos: 0 };

    let name = cur.read_escaped(b", ", SERIES_ESCAPES);
    if name.is_empty() {
        return Err((ParseErrorKind::ExpectedMeasurement, 0));
    }
    let mut record = Record::new(name, default_timestamp);

    while cur.peek() == Some(b',') {
        cur.pos += 1;
        let start = cur.pos;
        let key = cur.read_escaped(b",= ", KEY_ESCAPES);
        if key.is_empty() || cur.peek() != Some(b'=') {
            return Err((ParseErrorKind::ExpectedTag, start));
        }
        cur.pos += 1;
        let value_start = cur.pos;
        let value = cur.read_escaped(b", ", KEY_ESCAPES);
        if value.is_empty() {
            return Err((ParseErrorKind::ExpectedTag, value_start));
        }
        record.tags.insert(key, value);
    }

    if cur.peek() != Some(b' ') {
        return Err((ParseErrorKind::ExpectedField, cur.pos));
    }
    cur.pos += 1;

    loop {
        let start = cur.pos;
        let key = cur.read_escaped(b",= ", KEY_ESCAPES);
        if key.is_empty() || cur.peek() != Some(b'=') {
            return Err((ParseErrorKind::ExpectedField, start));
        }
        cur.pos += 1;
        let value = parse_field_value(&mut cur)?;
        record.fields.insert(key, value);

        match cur.peek() {
            Some(b',') => cur.pos += 1,
            Some(b' ') => break,
            None => return Ok(record),
            Some(_) => return Err((ParseErrorKind::ExpectedField, cur.pos)),
        }
    }

    cur.pos += 1;
    let start = cur.pos;
    let literal = cur.read_until(b" \t");
    let trailing = cur.read_until(b"");
    if trailing.iter().any(|b| !matches!(b, b' ' | b'\t')) {
        return Err((ParseErrorKind::ExpectedTimestamp, start + literal.len()));
    }
    if literal.is_empty() {
        return Ok(record);
    }

    let literal = std::str::from_utf8(literal).map_err(|_| (ParseErrorKind::ExpectedTimestamp, start))?;
    if !is_integer_literal(literal) {
        return Err((ParseErrorKind::ExpectedTimestamp, start));
    }
    let value: i64 = literal
        .parse()
        .map_err(|_| (ParseErrorKind::ValueOutOfRange, start))?;
    record.timestamp = precision
        .scale(value)
        .ok_or((ParseErrorKind::ValueOutOfRange, start))?;

    Ok(record)
}

fn parse_field_value(cur: &mut Cursor<'_>) -> LineResult<FieldValue> {
    let start = cur.pos;

    if cur.peek() == Some(b'"') {
        cur.pos += 1;
        let mut out = Vec::new();
        loop {
            match cur.peek() {
                None => return Err((ParseErrorKind::ExpectedField, start)),
                Some(b'"') => {
                    cur.pos += 1;
                    break;
                }
                Some(b'\\') if matches!(cur.buf.get(cur.pos + 1), Some(b'"' | b'\\')) => {
                    out.push(cur.buf[cur.pos + 1]);
                    cur.pos += 2;
                }
                Some(b) => {
                    out.push(b);
                    cur.pos += 1;
                }
            }
        }
        return Ok(FieldValue::String(String::from_utf8_lossy(&out).into_owned()));
    }

    let token = cur.read_until(b", ");
    let token = std::str::from_utf8(token).map_err(|_| (ParseErrorKind::ExpectedField, start))?;

    match token {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(digits) = token.strip_suffix('i') {
        if !is_integer_literal(digits) {
            return Err((ParseErrorKind::ExpectedField, start));
        }
        return digits
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| (ParseErrorKind::ValueOutOfRange, start));
    }

    if let Some(digits) = token.strip_suffix('u') {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err((ParseErrorKind::ExpectedField, start));
        }
        return digits
            .parse()
            .map(FieldValue::Unsigned)
            .map_err(|_| (ParseErrorKind::ValueOutOfRange, start));
    }

    if !is_float_literal(token) {
        return Err((ParseErrorKind::ExpectedField, start));
    }
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(FieldValue::Float(value)),
        _ => Err((ParseErrorKind::ValueOutOfRange, start)),
    }
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix(|c| c == '-' || c == '+').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Decimal literal with optional sign, fraction and exponent; no inf/nan
fn is_float_literal(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if matches!(b.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut has_digits = i > int_start;

    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        has_digits |= i > frac_start;
    }
    if !has_digits {
        return false;
    }

    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == b.len()
}
