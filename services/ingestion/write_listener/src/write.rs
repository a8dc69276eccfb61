//! Write endpoint: decode, parse, admit and deliver
//!
//! A request body is read chunk by chunk and fed to a [`StreamParser`].
//! Malformed records are counted and skipped; valid records are tagged and
//! handed to the accumulator. When admission is bounded (or the body is
//! compressed) the whole body is parsed before anything is delivered, so an
//! oversized batch or a corrupt stream is rejected before any record leaves
//! the request.
//!
//! A 400 caused by malformed records is returned even though the valid
//! records of the same body were already delivered.

use crate::accumulator::DeliveryError;
use crate::admission::AdmissionError;
use crate::error::{ApiError, ErrorCode};
use crate::state::{cancelled, ListenerState};
use flate2::write::GzDecoder;
use hyper::body::{Bytes, HttpBody};
use hyper::header::{HeaderMap, CONTENT_ENCODING, CONTENT_LENGTH};
use hyper::{Body, Request, Response, StatusCode};
use line_protocol::{ParseError, Parsed, Precision, Record, StreamParser};
use std::io::Write;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("http: request body too large")]
    BodyTooLarge,

    #[error("unable to decode gzip body: {0}")]
    Decode(#[source] std::io::Error),

    #[error("error reading request body: {0}")]
    Read(#[source] hyper::Error),

    #[error("timed out reading request body")]
    ReadTimeout,

    #[error("{message}")]
    Parse { message: String, line: usize },

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("request cancelled: listener is shutting down")]
    Cancelled,

    #[error("timed out handing metrics downstream")]
    DeliveryTimeout,

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl WriteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WriteError::BodyTooLarge => ErrorCode::TooLarge,
            WriteError::Decode(_)
            | WriteError::Read(_)
            | WriteError::ReadTimeout
            | WriteError::Parse { .. } => ErrorCode::Invalid,
            WriteError::Admission(AdmissionError::BatchTooLarge { .. }) => ErrorCode::TooLarge,
            WriteError::Admission(AdmissionError::Saturated { .. }) => ErrorCode::TooManyRequests,
            WriteError::Cancelled | WriteError::DeliveryTimeout | WriteError::Delivery(_) => {
                ErrorCode::Unavailable
            }
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        let error = ApiError::new(self.code(), self.to_string());
        match self {
            WriteError::Parse { line, .. } => error.with_line(*line),
            WriteError::Decode(source) => error.with_err(source.to_string()),
            WriteError::Read(source) => error.with_err(source.to_string()),
            _ => error,
        }
    }
}

/// Query parameters understood by the write endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteParams {
    pub bucket: String,
    pub precision: Precision,
}

impl WriteParams {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = WriteParams::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "bucket" => params.bucket = value.into_owned(),
                "precision" => params.precision = Precision::from_query(&value),
                _ => {}
            }
        }
        params
    }
}

/// Message reported for the malformed records of one request
pub fn aggregate_parse_errors(first: &ParseError, malformed: usize) -> String {
    match malformed {
        0 | 1 => first.to_string(),
        2 => format!("{} (and 1 other parse error)", first),
        n => format!("{} (and {} other parse errors)", first, n - 1),
    }
}

pub(crate) async fn serve_write(req: Request<Body>, state: &ListenerState) -> Response<Body> {
    state.stats.writes_served.incr(1);

    match ingest(req, state).await {
        Ok(delivered) => {
            debug!(delivered, "write accepted");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NO_CONTENT;
            response
        }
        Err(err) => {
            if let WriteError::Admission(_) = err {
                state.stats.admission_rejections.incr(1);
            }
            debug!(error = %err, status = %err.code().status(), "write rejected");
            err.to_api_error().into_response()
        }
    }
}

async fn ingest(req: Request<Body>, state: &ListenerState) -> Result<usize, WriteError> {
    let max_body_size = state.config.max_body_size;
    if content_length(req.headers()).is_some_and(|len| len > max_body_size) {
        return Err(WriteError::BodyTooLarge);
    }

    let params = WriteParams::from_query(req.uri().query());
    let gzip = is_gzip(req.headers());
    let default_timestamp = params.precision.truncate((state.clock)());

    let mut decoder = BodyDecoder::new(gzip);
    let mut session = IngestSession::new(state, &params, default_timestamp, gzip);
    let mut body = req.into_body();
    let mut raw_bytes: u64 = 0;

    while let Some(chunk) = session.next_chunk(&mut body).await? {
        raw_bytes += chunk.len() as u64;
        if raw_bytes > max_body_size {
            return Err(WriteError::BodyTooLarge);
        }
        decoder.decode(&chunk, &mut session.parser)?;
        session.drain().await?;
    }

    decoder.finish(&mut session.parser)?;
    session.parser.finish();
    session.drain().await?;
    session.complete().await
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"))
}

enum BodyDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
}

impl BodyDecoder {
    fn new(gzip: bool) -> Self {
        if gzip {
            BodyDecoder::Gzip(GzDecoder::new(Vec::new()))
        } else {
            BodyDecoder::Identity
        }
    }

    fn decode(&mut self, chunk: &[u8], parser: &mut StreamParser) -> Result<(), WriteError> {
        match self {
            BodyDecoder::Identity => parser.feed(chunk),
            BodyDecoder::Gzip(decoder) => {
                decoder.write_all(chunk).map_err(WriteError::Decode)?;
                let decoded = decoder.get_mut();
                parser.feed(decoded);
                decoded.clear();
            }
        }
        Ok(())
    }

    fn finish(self, parser: &mut StreamParser) -> Result<(), WriteError> {
        if let BodyDecoder::Gzip(decoder) = self {
            let rest = decoder.finish().map_err(WriteError::Decode)?;
            parser.feed(&rest);
        }
        Ok(())
    }
}

/// Per-request parse and delivery state
struct IngestSession<'a> {
    state: &'a ListenerState,
    parser: StreamParser,
    bucket: Option<(&'a str, String)>,
    /// Hold records until the body is complete instead of streaming them
    buffered: bool,
    batch: Vec<Record>,
    offset: u64,
    malformed: usize,
    first_error: Option<ParseError>,
    delivered: usize,
    shutdown: watch::Receiver<bool>,
}

impl<'a> IngestSession<'a> {
    fn new(state: &'a ListenerState, params: &WriteParams, default_timestamp: i64, gzip: bool) -> Self {
        let bucket_tag = state.config.bucket_tag.as_str();
        let bucket = (!bucket_tag.is_empty() && !params.bucket.is_empty())
            .then(|| (bucket_tag, params.bucket.clone()));

        Self {
            state,
            parser: StreamParser::new(params.precision, default_timestamp),
            bucket,
            buffered: state.admission.is_bounded() || gzip,
            batch: Vec::new(),
            offset: 0,
            malformed: 0,
            first_error: None,
            delivered: 0,
            shutdown: state.shutdown_signal(),
        }
    }

    async fn next_chunk(&mut self, body: &mut Body) -> Result<Option<Bytes>, WriteError> {
        let read = tokio::time::timeout(self.state.config.read_timeout(), body.data());

        tokio::select! {
            biased;
            _ = cancelled(&mut self.shutdown) => Err(WriteError::Cancelled),
            chunk = read => match chunk {
                Err(_) => Err(WriteError::ReadTimeout),
                Ok(None) => Ok(None),
                Ok(Some(Err(e))) => Err(WriteError::Read(e)),
                Ok(Some(Ok(bytes))) => Ok(Some(bytes)),
            },
        }
    }

    /// Pull every record currently available from the parser
    async fn drain(&mut self) -> Result<(), WriteError> {
        loop {
            let parsed = self.parser.next_record();
            self.count_bytes();

            match parsed {
                Parsed::Record(mut record) => {
                    if let Some((tag, bucket)) = &self.bucket {
                        record.set_tag(*tag, bucket.as_str());
                    }
                    if self.buffered {
                        self.batch.push(record);
                    } else {
                        self.deliver(record).await?;
                    }
                }
                Parsed::Malformed(err) => {
                    self.malformed += 1;
                    if self.first_error.is_none() {
                        self.first_error = Some(err);
                    }
                }
                Parsed::Incomplete | Parsed::EndOfStream => return Ok(()),
            }
        }
    }

    async fn complete(mut self) -> Result<usize, WriteError> {
        let batch = std::mem::take(&mut self.batch);
        self.state.admission.check_batch(batch.len())?;
        for record in batch {
            self.deliver(record).await?;
        }

        match self.first_error {
            None => Ok(self.delivered),
            Some(first) => Err(WriteError::Parse {
                message: aggregate_parse_errors(&first, self.malformed),
                line: first.line,
            }),
        }
    }

    async fn deliver(&mut self, record: Record) -> Result<(), WriteError> {
        let state = self.state;
        let token = state.admission.try_admit()?;
        let handoff = tokio::time::timeout(
            state.config.write_timeout(),
            state.accumulator.deliver(record, token),
        );

        tokio::select! {
            biased;
            _ = cancelled(&mut self.shutdown) => Err(WriteError::Cancelled),
            result = handoff => match result {
                Err(_) => Err(WriteError::DeliveryTimeout),
                Ok(result) => {
                    result?;
                    self.delivered += 1;
                    Ok(())
                }
            },
        }
    }

    fn count_bytes(&mut self) {
        let offset = self.parser.offset();
        let delta = offset - self.offset;
        if delta > 0 {
            self.state.stats.bytes_received.incr(delta as i64);
            self.offset = offset;
        }
    }
}
