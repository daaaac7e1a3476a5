//! Transport abstraction for the upstream generative API
//!
//! Defines the `Transport` trait that decouples the key pool from the wire
//! protocol. The pool hands a credential and an opaque JSON payload to the
//! transport and interprets the outcome through the [`TransportError`]
//! taxonomy; it never inspects payloads or response bodies itself.
//!
//! [`HttpTransport`] is the production implementation over `reqwest`; tests
//! substitute scripted in-memory transports.

pub mod classify;
pub mod http;

pub use classify::{classify_status, parse_retry_after};
pub use http::HttpTransport;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;

/// Broad retry class of an upstream failure.
///
/// The pool uses this to decide what happens after a failed attempt:
/// - `RateLimit` rotates to the next key without penalizing the breaker
/// - `Retryable` rotates to the next key and feeds the breaker
/// - `Fatal` feeds the breaker and is surfaced to the caller unretried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 429 — expected throttling, try another key
    RateLimit,
    /// Timeouts, connection failures, 5xx — try another key
    Retryable,
    /// Auth/validation errors (401/403/4xx) — retrying cannot help
    Fatal,
}

/// A successful upstream response: status plus the raw JSON body.
///
/// The body stays opaque here; payload parsing belongs to the services
/// consuming the pool.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Errors from a single transport attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited by upstream (429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream server error ({status})")]
    Server { status: u16 },

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream rejected credential ({status})")]
    Auth { status: u16 },

    #[error("upstream rejected request ({status})")]
    Validation { status: u16 },

    #[error("connection to upstream failed: {0}")]
    Connection(String),
}

impl TransportError {
    /// The HTTP status behind this error, where one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::RateLimited { .. } => Some(429),
            TransportError::Server { status }
            | TransportError::Auth { status }
            | TransportError::Validation { status } => Some(*status),
            TransportError::Timeout | TransportError::Connection(_) => None,
        }
    }

    /// Retry class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::RateLimited { .. } => ErrorClass::RateLimit,
            TransportError::Server { .. }
            | TransportError::Timeout
            | TransportError::Connection(_) => ErrorClass::Retryable,
            TransportError::Auth { .. } | TransportError::Validation { .. } => ErrorClass::Fatal,
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// One call to the upstream generative API.
///
/// Implementations own request/response marshalling; the pool owns key
/// selection, rate limiting, and retry. Uses `Pin<Box<dyn Future>>` return
/// types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http", "mock")
    fn id(&self) -> &str;

    /// Execute one request with the given credential and opaque payload.
    ///
    /// `timeout` bounds the whole attempt; expiry must surface as
    /// [`TransportError::Timeout`], never as a hang.
    fn call<'a>(
        &'a self,
        credential: &'a Secret<String>,
        payload: &'a serde_json::Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_classifies_as_rate_limit() {
        let err = TransportError::RateLimited { retry_after: None };
        assert_eq!(err.class(), ErrorClass::RateLimit);
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn server_and_timeout_classify_as_retryable() {
        assert_eq!(
            TransportError::Server { status: 503 }.class(),
            ErrorClass::Retryable
        );
        assert_eq!(TransportError::Timeout.class(), ErrorClass::Retryable);
        assert_eq!(
            TransportError::Connection("refused".into()).class(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn auth_and_validation_classify_as_fatal() {
        assert_eq!(
            TransportError::Auth { status: 401 }.class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            TransportError::Validation { status: 422 }.class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn timeout_has_no_status() {
        assert_eq!(TransportError::Timeout.status(), None);
    }

    #[test]
    fn error_display_never_includes_credentials() {
        let err = TransportError::Auth { status: 403 };
        let text = err.to_string();
        assert!(text.contains("403"), "got: {text}");
        assert!(!text.contains("sk-"), "got: {text}");
    }
}
