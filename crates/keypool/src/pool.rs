//! Key pool: ownership, selection, health, stats
//!
//! The pool owns every [`KeyMetrics`] for the process lifetime and hands out
//! keys to callers. Selection first filters to keys whose breaker admits
//! traffic (which is also where lazy open→half-open recovery fires), applies
//! the configured strategy, then awaits the chosen key's token bucket. There
//! is no pool-wide mutation lock: each key serializes its own state, and the
//! round-robin cursor is a lone atomic, so traffic on distinct keys never
//! contends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::bucket::TokenBucket;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::key::{KeyMetrics, KeyStats};

/// Key-selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through keys in configured order, skipping ineligible ones
    #[default]
    RoundRobin,
    /// Pick the eligible key with the most available tokens
    LeastBusy,
}

/// A selected key, ready for one transport attempt.
///
/// Holds a reference to the key's metrics so the outcome can be recorded
/// against the same key that served the attempt.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    key: Arc<KeyMetrics>,
}

impl KeyHandle {
    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    pub fn credential(&self) -> &common::Secret<String> {
        self.key.credential()
    }
}

/// Serializable pool-wide stats snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// `healthy` (all keys closed), `degraded` (some eligible), `unhealthy` (none)
    pub status: &'static str,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rate_limit_errors: u64,
    pub keys: Vec<KeyStats>,
}

/// Shared pool of interchangeable credentials.
///
/// Constructed once at startup and injected wherever calls are made; all
/// mutation funnels through its methods.
pub struct KeyPool {
    keys: Vec<Arc<KeyMetrics>>,
    strategy: Strategy,
    cursor: AtomicUsize,
}

impl KeyPool {
    /// Create a pool over pre-built keys. An empty key set is rejected:
    /// a pool that can never serve anything is a configuration error.
    pub fn new(keys: Vec<KeyMetrics>, strategy: Strategy) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::Config("pool requires at least one key".into()));
        }
        info!(keys = keys.len(), ?strategy, "key pool initialized");
        Ok(Self {
            keys: keys.into_iter().map(Arc::new).collect(),
            strategy,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Build a pool from validated configuration, synthesizing `key-N` ids
    /// in credential order.
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        let breaker_config = BreakerConfig {
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout(),
            success_threshold: config.success_threshold,
        };
        let mut keys = Vec::with_capacity(config.credentials.len());
        for (i, credential) in config.credentials.iter().enumerate() {
            keys.push(KeyMetrics::new(
                format!("key-{}", i + 1),
                credential.clone(),
                TokenBucket::with_capacity(
                    config.qps_per_key,
                    config.qps_per_key * config.burst_multiplier,
                )?,
                CircuitBreaker::new(breaker_config.clone())?,
            ));
        }
        Self::new(keys, config.strategy)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Select an eligible key and wait for its rate-limit quota.
    ///
    /// Eligibility is the breaker's call (`allow_request`, which may flip an
    /// open breaker to half-open once its recovery timeout has elapsed). If
    /// no key is eligible this returns `PoolExhausted` immediately rather
    /// than parking the caller on a key that may never recover. The bucket
    /// wait happens after selection, without any pool or key lock held.
    pub async fn acquire_key(&self) -> Result<KeyHandle> {
        let eligible: Vec<bool> = self
            .keys
            .iter()
            .map(|k| k.breaker().allow_request())
            .collect();
        let available = eligible.iter().filter(|e| **e).count();
        if available == 0 {
            return Err(self.exhausted(0, None));
        }

        let idx = match self.strategy {
            Strategy::RoundRobin => self.pick_round_robin(&eligible),
            Strategy::LeastBusy => self.pick_least_busy(&eligible),
        };
        let key = Arc::clone(&self.keys[idx]);
        debug!(key_id = key.key_id(), "key selected, awaiting quota");
        key.bucket().acquire(1.0).await;
        Ok(KeyHandle { key })
    }

    /// Walk forward from the cursor to the first eligible key, then park the
    /// cursor just past it so the next call continues the cycle. The advance
    /// is a compare-exchange so two concurrent callers observing the same
    /// cursor cannot both claim the same position; the loser retries from
    /// the winner's updated cursor.
    fn pick_round_robin(&self, eligible: &[bool]) -> usize {
        let n = self.keys.len();
        loop {
            let start = self.cursor.load(Ordering::Relaxed);
            let mut idx = start % n;
            for offset in 0..n {
                idx = (start + offset) % n;
                if eligible[idx] {
                    break;
                }
            }
            if self
                .cursor
                .compare_exchange(start, (idx + 1) % n, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return idx;
            }
        }
    }

    /// Pick the eligible key with the strictly greatest token balance; ties
    /// keep the earliest configured key for determinism.
    fn pick_least_busy(&self, eligible: &[bool]) -> usize {
        let mut best = usize::MAX;
        let mut best_tokens = f64::NEG_INFINITY;
        for (idx, key) in self.keys.iter().enumerate() {
            if !eligible[idx] {
                continue;
            }
            let tokens = key.bucket().available();
            if tokens > best_tokens {
                best = idx;
                best_tokens = tokens;
            }
        }
        best
    }

    /// Record a successful attempt against the key that served it.
    pub fn record_success(&self, handle: &KeyHandle, latency: Duration, status: u16) {
        handle.key.record_success(latency, status);
    }

    /// Record a failed attempt (server error, timeout, or non-retryable).
    pub fn record_failure(&self, handle: &KeyHandle, latency: Duration, status: Option<u16>) {
        handle.key.record_failure(latency, status);
    }

    /// Record a 429. Bypasses the breaker by design.
    pub fn record_rate_limit(&self, handle: &KeyHandle, latency: Duration) {
        handle.key.record_rate_limit(latency);
    }

    /// Consistent stats snapshot: pool totals, per-key stats, health labels.
    ///
    /// Reads each key's counters under that key's lock only for the copy;
    /// no cross-key lock is held, and nothing is mutated, so two consecutive
    /// snapshots with no intervening traffic are identical.
    pub fn get_stats(&self) -> PoolStats {
        let keys: Vec<KeyStats> = self.keys.iter().map(|k| k.snapshot()).collect();
        let available = keys.iter().filter(|k| k.health != "failed").count();
        let status = if available == keys.len() && keys.iter().all(|k| k.health == "healthy") {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };
        PoolStats {
            status,
            total_requests: keys.iter().map(|k| k.requests).sum(),
            total_successes: keys.iter().map(|k| k.successes).sum(),
            total_failures: keys.iter().map(|k| k.failures).sum(),
            total_rate_limit_errors: keys.iter().map(|k| k.rate_limit_errors).sum(),
            keys,
        }
    }

    /// Build the terminal exhaustion error with current eligibility counts.
    pub(crate) fn exhausted(
        &self,
        attempts: u32,
        last: Option<upstream::TransportError>,
    ) -> Error {
        let available = self
            .keys
            .iter()
            .filter(|k| k.breaker().state() != crate::breaker::CircuitState::Open)
            .count();
        Error::PoolExhausted {
            attempts,
            total: self.keys.len(),
            available,
            last,
        }
    }
}
