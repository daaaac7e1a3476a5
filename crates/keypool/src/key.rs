//! Per-key bookkeeping
//!
//! One [`KeyMetrics`] per configured credential, created at pool construction
//! and alive for the pool's lifetime. It composes the key's token bucket and
//! circuit breaker with request counters, a latency min/max/total, and a
//! response-code histogram. The raw credential is held behind
//! [`common::Secret`]; only the synthesized `key_id` ever reaches logs or
//! stats.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use common::Secret;
use serde::Serialize;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::bucket::TokenBucket;

/// Counter block, protected by the key's mutex. Latency updates and counter
/// increments for one outcome are applied atomically together.
#[derive(Debug, Default)]
struct Counters {
    requests: u64,
    successes: u64,
    failures: u64,
    rate_limit_errors: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
    response_codes: BTreeMap<u16, u64>,
}

impl Counters {
    fn observe_latency(&mut self, latency: Duration) {
        self.total_latency += latency;
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }

    fn observe_code(&mut self, code: Option<u16>) {
        if let Some(code) = code {
            *self.response_codes.entry(code).or_insert(0) += 1;
        }
    }
}

/// Serializable snapshot of one key's counters and health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStats {
    pub key_id: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limit_errors: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub response_codes: BTreeMap<u16, u64>,
    /// `healthy` (closed), `degraded` (half-open) or `failed` (open)
    pub health: &'static str,
}

/// State for one credential: identity, quota, health, counters.
#[derive(Debug)]
pub struct KeyMetrics {
    key_id: String,
    credential: Secret<String>,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    counters: Mutex<Counters>,
}

impl KeyMetrics {
    pub fn new(
        key_id: impl Into<String>,
        credential: Secret<String>,
        bucket: TokenBucket,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            credential,
            bucket,
            breaker,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Opaque identifier used everywhere the key is named externally.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The raw credential, for the transport boundary only.
    pub fn credential(&self) -> &Secret<String> {
        &self.credential
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Record a successful call: counters, latency, histogram, breaker.
    pub fn record_success(&self, latency: Duration, status: u16) {
        {
            let mut counters = self.counters.lock().expect("key counters lock poisoned");
            counters.requests += 1;
            counters.successes += 1;
            counters.observe_latency(latency);
            counters.observe_code(Some(status));
        }
        self.breaker.record_success();
    }

    /// Record a failed call. Feeds the breaker; transport-level failures
    /// without an HTTP status (timeouts) skip the histogram.
    pub fn record_failure(&self, latency: Duration, status: Option<u16>) {
        {
            let mut counters = self.counters.lock().expect("key counters lock poisoned");
            counters.requests += 1;
            counters.failures += 1;
            counters.observe_latency(latency);
            counters.observe_code(status);
        }
        self.breaker.record_failure();
    }

    /// Record a 429. Counted separately and deliberately kept away from the
    /// breaker: throttling is expected load shedding, not a key fault, and
    /// must not open the circuit.
    pub fn record_rate_limit(&self, latency: Duration) {
        let mut counters = self.counters.lock().expect("key counters lock poisoned");
        counters.requests += 1;
        counters.rate_limit_errors += 1;
        counters.observe_latency(latency);
        counters.observe_code(Some(429));
    }

    /// Consistent snapshot of this key's stats. Holds the counter lock only
    /// for the copy; the breaker state is read without side effects.
    pub fn snapshot(&self) -> KeyStats {
        let counters = self.counters.lock().expect("key counters lock poisoned");
        let observed = counters.requests;
        let avg_latency_ms = if observed > 0 {
            counters.total_latency.as_secs_f64() * 1000.0 / observed as f64
        } else {
            0.0
        };
        KeyStats {
            key_id: self.key_id.clone(),
            requests: counters.requests,
            successes: counters.successes,
            failures: counters.failures,
            rate_limit_errors: counters.rate_limit_errors,
            avg_latency_ms,
            min_latency_ms: counters
                .min_latency
                .map_or(0.0, |l| l.as_secs_f64() * 1000.0),
            max_latency_ms: counters
                .max_latency
                .map_or(0.0, |l| l.as_secs_f64() * 1000.0),
            response_codes: counters.response_codes.clone(),
            health: health_label(self.breaker.state()),
        }
    }
}

/// Health label for a breaker state.
pub fn health_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "healthy",
        CircuitState::HalfOpen => "degraded",
        CircuitState::Open => "failed",
    }
}
