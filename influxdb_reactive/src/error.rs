//! Error types for the [`Client`][crate::Client] and its write pipeline.

use std::fmt::Display;

use reqwest::{Method, StatusCode};
use serde::Deserialize;

/// Boxed error returned by user supplied conversions, e.g. [`Measurement::to_point`]
///
/// [`Measurement::to_point`]: crate::Measurement::to_point
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Primary error type for the [`Client`][crate::Client]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value for option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error(
        "default write options are not defined, provide a database in the client options \
        or use a write method that accepts WriteOptions"
    )]
    MissingWriteOptions,

    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("the client is closed")]
    Closed,

    #[error("the write buffer is full (limit {limit}) and the overflow strategy is Error")]
    BufferOverflow { limit: usize },

    #[error("base URL error: {0}")]
    BaseUrl(#[source] url::ParseError),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read the API response: {0}")]
    ResponseBody(#[source] reqwest::Error),

    #[error("{0}")]
    Server(#[from] ServerError),

    #[error("can not calculate line protocol for '{payload}': {source}")]
    Serialization {
        payload: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to write through UDP to port {port}: {source}")]
    Udp {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode query response chunk: {0}")]
    QueryDecode(#[source] serde_json::Error),

    #[error("query response stream failed: {0}")]
    QueryStream(#[source] BoxError),
}

impl Error {
    pub(crate) fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    pub(crate) fn invalid_option(name: &'static str, reason: impl Display) -> Self {
        Self::InvalidOption {
            name,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn serialization(payload: impl std::fmt::Debug, source: impl Into<BoxError>) -> Self {
        Self::Serialization {
            payload: format!("{payload:?}"),
            source: source.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How the write pipeline reacts to a [`ServerError`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Some lines of the body were rejected, the rest were written. Never retried.
    PartialWrite,
    /// A transient condition on the server, e.g. a full cache. Retried with backoff.
    Retryable,
    /// A permanent rejection, e.g. an unknown database. Never retried.
    Fatal,
}

// Messages the server uses for rejections that will not change on a retry.
const FATAL_MESSAGES: &[&str] = &[
    "database not found",
    "points beyond retention policy",
    "unable to parse",
    "field type conflict",
    "user is required to write to database",
    "user is not authorized to write to database",
    "authorization failed",
    "username required",
];

// Messages known to describe a transient overload.
const RETRYABLE_MESSAGES: &[&str] = &[
    "hinted handoff queue not empty",
    "cache-max-memory-size exceeded",
    "timeout",
];

/// A structured error reported by the server, read from the error header or the response body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServerError {
    status: Option<StatusCode>,
    message: String,
}

impl ServerError {
    /// Create a [`ServerError`] from a status code and the message the server reported
    pub fn new(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build the error from the `X-Influxdb-Error` header value if there is one, otherwise from
    /// the response body
    ///
    /// A body of the form `{"error": "..."}` is unwrapped, any other body is used verbatim.
    pub fn from_response(status: StatusCode, header: Option<&str>, body: &str) -> Self {
        if let Some(message) = header.filter(|h| !h.is_empty()) {
            return Self::new(Some(status), message);
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            error: String,
        }

        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody { error }) => error,
            Err(_) if body.trim().is_empty() => status.to_string(),
            Err(_) => body.trim().to_string(),
        };
        Self::new(Some(status), message)
    }

    /// The HTTP status of the response, if the error came from an HTTP response
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The message reported by the server
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify the error
    pub fn kind(&self) -> ServerErrorKind {
        let message = self.message.to_lowercase();
        if message.starts_with("partial write") {
            return ServerErrorKind::PartialWrite;
        }
        if FATAL_MESSAGES.iter().any(|m| message.contains(m)) {
            return ServerErrorKind::Fatal;
        }
        if RETRYABLE_MESSAGES.iter().any(|m| message.contains(m)) {
            return ServerErrorKind::Retryable;
        }
        match self.status {
            Some(
                StatusCode::BAD_REQUEST
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::NOT_FOUND
                | StatusCode::PAYLOAD_TOO_LARGE,
            ) => ServerErrorKind::Fatal,
            _ => ServerErrorKind::Retryable,
        }
    }

    /// `true` when the server reported that only part of the body was written
    pub fn is_partial_write(&self) -> bool {
        self.kind() == ServerErrorKind::PartialWrite
    }

    /// `true` when resubmitting the same body may succeed
    pub fn is_retry_worth(&self) -> bool {
        self.kind() == ServerErrorKind::Retryable
    }
}

/// Walk the `source()` chain looking for an end-of-stream condition
///
/// A remote peer closing the socket mid-response cannot be told apart from an intentional close,
/// so both count as the end of the data.
pub(crate) fn is_eof(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        let message = e.to_string().to_lowercase();
        if message.contains("socket closed") || message.contains("end of file") {
            return true;
        }
        current = e.source();
    }
    false
}
