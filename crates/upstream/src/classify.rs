//! HTTP status classification for upstream responses
//!
//! Maps the status of a completed upstream exchange onto the retry taxonomy:
//! 429 is expected throttling, 408/5xx are retryable faults, and the
//! remaining 4xx family means the request or credential itself is bad and a
//! different key cannot fix it.

use std::time::Duration;

use tracing::warn;

use crate::ErrorClass;

/// Classify a non-success HTTP status into a retry class.
///
/// 2xx statuses never reach this function; callers build a [`crate::Response`]
/// for those instead.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimit,
        408 | 500..=599 => ErrorClass::Retryable,
        _ => ErrorClass::Fatal,
    }
}

/// Parse a `Retry-After` header value into a Duration.
///
/// Upstream sends integer seconds on 429 responses. Anything unparseable is
/// reported and treated as absent; the pool falls back to its own bucket
/// pacing either way.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(_) => {
            warn!(value, "unparseable Retry-After header, ignoring");
            None
        }
    }
}
