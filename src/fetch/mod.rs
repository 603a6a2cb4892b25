//! Outbound HTTP with rate-limit aware retries
//!
//! Requests go through a `Transport` (reqwest in production, a scripted replay
//! in tests). The `Fetcher` wraps a transport with bounded exponential backoff
//! that only triggers on HTTP 429.

mod retry;
mod transport;

pub use retry::{Fetcher, RetryPolicy, RetryState, BACKOFF_FACTOR};
pub use transport::{ReqwestTransport, ScriptedTransport, Transport};

use reqwest::Method;
use thiserror::Error;

/// HTTP status that signals rate limiting
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Errors that can occur when calling an upstream API
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network or transport failure before a status was received
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Upstream answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Upstream answered 200 but its envelope reports an error
    #[error("API error {code}: {msg}")]
    Api { code: String, msg: String },

    /// Retry or client settings are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FetchError {
    /// Returns true if this error is an HTTP 429
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if *status == TOO_MANY_REQUESTS)
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// An outbound request, replayed unchanged on every retry
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Creates a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a POST request with a JSON body
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Adds a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Status and raw body of an upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 200 response with a JSON body
    pub fn ok_json(body: &serde_json::Value) -> Self {
        Self::new(200, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
