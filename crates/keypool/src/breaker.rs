//! Per-key circuit breaker
//!
//! Failure-isolation state machine with three states:
//!
//! - `Closed` — requests flow; `failure_threshold` consecutive failures open it
//! - `Open` — requests blocked; after `recovery_timeout` the next
//!   `allow_request()` flips to `HalfOpen`
//! - `HalfOpen` — probe traffic allowed; one failure reopens, while
//!   `success_threshold` consecutive successes close it
//!
//! The Open→HalfOpen transition is evaluated lazily inside `allow_request()`
//! rather than by a background timer, so recovery is only noticed when
//! something actually asks the breaker. Consecutive counters reset on every
//! transition. One mutex serializes all mutation for a breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Breaker state, reported in stats as healthy/degraded/failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds and timing for one breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u32,
    /// How long an open breaker blocks before allowing a probe
    pub recovery_timeout: Duration,
    /// Consecutive successes that close a half-open breaker
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Per-key failure isolation.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker. Zero thresholds are rejected: a breaker that
    /// opens on zero failures (or can never close) is a misconfiguration.
    pub fn new(config: BreakerConfig) -> Result<Self> {
        if config.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".into()));
        }
        if config.success_threshold == 0 {
            return Err(Error::Config("success_threshold must be at least 1".into()));
        }
        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        })
    }

    /// Whether a request may proceed. In `Open`, this is also where the
    /// recovery timeout is checked and the lazy Open→HalfOpen transition
    /// happens.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    debug!("recovery timeout elapsed, breaker half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call. Closes a half-open breaker once the success
    /// threshold is met.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    debug!("probe successes reached threshold, breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            // A success while open means the caller raced the transition;
            // the breaker stays open until allow_request() re-evaluates.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Opens a closed breaker at the failure threshold
    /// and immediately reopens a half-open one.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_successes = 0;
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "failure threshold reached, breaker open"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::HalfOpen => {
                warn!("probe failed, breaker reopened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state without side effects. Stats snapshots use this so two
    /// consecutive snapshots with no intervening traffic are identical.
    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .expect("circuit breaker lock poisoned")
            .state
    }
}
