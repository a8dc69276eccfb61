//! Error types for the write listener

use hyper::{header, Body, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Process-scoped failures surfaced from `start()` or configuration loading
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Listener already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, ListenerError>;

/// Error classes reported to HTTP clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "invalid")]
    Invalid,
    #[serde(rename = "unauthorized")]
    Unauthorized,
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "request too large")]
    TooLarge,
    #[serde(rename = "too many requests")]
    TooManyRequests,
    #[serde(rename = "unavailable")]
    Unavailable,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::Invalid => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Invalid => "invalid",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::NotFound => "not found",
            ErrorCode::TooLarge => "request too large",
            ErrorCode::TooManyRequests => "too many requests",
            ErrorCode::Unavailable => "unavailable",
        }
    }
}

/// JSON error body returned by every failing route
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub op: String,
    pub err: String,
    pub line: Option<usize>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            op: String::new(),
            err: String::new(),
            line: None,
        }
    }

    pub fn with_err(mut self, err: impl Into<String>) -> Self {
        self.err = err.into();
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = serde_json::to_vec(&self).unwrap_or_default();

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8");
        if let Ok(value) = header::HeaderValue::from_str(&self.message) {
            builder = builder.header("X-Influxdb-Error", value);
        }

        builder.body(Body::from(body)).unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            response
        })
    }
}
