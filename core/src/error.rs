//! Error types for the Hodela API client.
//!
//! # Design
//! Everything that can go wrong on the way from a `Call` to a `Response`
//! lands in [`Error`]. Misuse (bad configuration, missing credentials, an
//! unsupported verb, an oversized batch) fails immediately at the point of
//! use, before anything reaches the transport. Transport failures are carried
//! unmodified in [`TransportError`]. Error payloads returned by the API itself
//! are classified into an [`ApiError`] when the reply is decoded and only
//! raised by `Client::send`.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

/// Message used when an error payload carries no message of its own.
pub const UNKNOWN_API_ERROR: &str = "Unknown error from API.";

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the client pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid constructor or configuration input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credentials were needed to build a URL or body but none were set.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The HTTP method is unset or not one of GET, POST, DELETE.
    #[error("invalid HTTP method {0:?}, expected GET, POST or DELETE")]
    InvalidMethod(String),

    /// A batch was compiled with no calls or with more than the limit.
    #[error("batch holds {count} calls, expected between 1 and {limit}")]
    BatchSize { count: usize, limit: usize },

    /// An upload could not be opened or read.
    #[error("unable to read upload {path}: {source}")]
    FileUpload {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The batch description could not be encoded as JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Failures raised by an `HttpTransport`. Never produced for HTTP status codes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

/// Coarse classification of an API error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Codes 1 and 2: server-side issue, possibly downtime.
    Server,
    /// Code 3: the application is being rate limited.
    Throttle,
    /// Any other code.
    Other,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::Server => write!(f, "server"),
            ApiErrorKind::Throttle => write!(f, "throttle"),
            ApiErrorKind::Other => write!(f, "API"),
        }
    }
}

/// An error payload returned by the API, classified by its `code`.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} error (code {}): {message}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: Option<i64>,
    pub message: String,
    /// The payload's `error.type`, empty when absent.
    pub error_type: String,
    pub http_status: u16,
    pub raw_body: String,
}

impl ApiError {
    /// Classify a decoded error payload.
    ///
    /// A payload that has a top-level `code` but no `error.code` is treated as
    /// if the whole object were the `error` member.
    pub fn classify(decoded: &Map<String, Value>, http_status: u16, raw_body: &str) -> Self {
        let nested = decoded
            .get("error")
            .and_then(Value::as_object)
            .filter(|error| error.contains_key("code"));
        let details = match nested {
            Some(error) => error,
            None if decoded.contains_key("code") => decoded,
            None => decoded.get("error").and_then(Value::as_object).unwrap_or(decoded),
        };

        let code = details.get("code").and_then(as_code);
        let message = details
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_API_ERROR)
            .to_string();
        let error_type = details
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match code {
            Some(1) | Some(2) => ApiErrorKind::Server,
            Some(3) => ApiErrorKind::Throttle,
            _ => ApiErrorKind::Other,
        };

        ApiError {
            kind,
            code,
            message,
            error_type,
            http_status,
            raw_body: raw_body.to_string(),
        }
    }
}

/// Error codes arrive as integers, occasionally as numeric strings.
fn as_code(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
