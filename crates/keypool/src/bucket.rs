//! Token bucket rate limiter for a single key
//!
//! Classic token bucket: a balance of fractional tokens refills at a constant
//! rate up to a burst ceiling, and each request consumes one token. Refill and
//! consume happen inside one mutex so the sustained-rate bound holds under any
//! interleaving of concurrent callers.
//!
//! `acquire` never sleeps while holding the lock: it computes the wait,
//! releases, sleeps, then re-checks. Consumption only happens under the lock
//! after the wait, so a cancelled caller cannot leave a token half-consumed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Mutable bucket state, protected by the bucket's mutex.
#[derive(Debug)]
struct BucketInner {
    /// Current balance; invariant `0 <= tokens <= capacity`
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token bucket bounding sustained call rate with burst tolerance.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    inner: Mutex<BucketInner>,
}

impl TokenBucket {
    /// Create a bucket refilling at `refill_rate` tokens/second with the
    /// default burst ceiling of two seconds' worth of quota, floored at one
    /// token so sub-0.5 rates still admit a request.
    ///
    /// A zero or non-finite rate is a configuration mistake and is rejected
    /// here rather than producing a bucket that blocks forever.
    pub fn new(refill_rate: f64) -> Result<Self> {
        Self::with_capacity(refill_rate, (refill_rate * 2.0).max(1.0))
    }

    /// Create a bucket with an explicit burst ceiling.
    ///
    /// A request costs one token, so a capacity below 1.0 could never be
    /// acquired from no matter how long the caller waits; such capacities
    /// are rejected here.
    pub fn with_capacity(refill_rate: f64, capacity: f64) -> Result<Self> {
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(Error::Config(format!(
                "refill_rate must be a positive number, got {refill_rate}"
            )));
        }
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(Error::Config(format!(
                "bucket capacity must be at least one token, got {capacity}"
            )));
        }
        Ok(Self {
            capacity,
            refill_rate,
            inner: Mutex::new(BucketInner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Credit tokens for the time elapsed since the last refill, capped at
    /// capacity. Called with the lock held.
    fn refill(&self, inner: &mut BucketInner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.refill_rate).min(self.capacity);
            inner.last_refill = now;
        }
    }

    /// Take `n` tokens without blocking. Returns false if the balance is
    /// insufficient, leaving it untouched.
    pub fn try_acquire(&self, n: f64) -> bool {
        debug_assert!(n > 0.0 && n <= self.capacity);
        let mut inner = self.inner.lock().expect("token bucket lock poisoned");
        self.refill(&mut inner);
        if inner.tokens >= n {
            inner.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Take `n` tokens, suspending until the balance allows it.
    ///
    /// `n` must not exceed the bucket capacity, otherwise the deficit can
    /// never refill. Cancellation between the sleep and the re-check is safe:
    /// nothing is consumed until the final locked check succeeds.
    pub async fn acquire(&self, n: f64) {
        debug_assert!(n > 0.0 && n <= self.capacity);
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("token bucket lock poisoned");
                self.refill(&mut inner);
                if inner.tokens >= n {
                    inner.tokens -= n;
                    return;
                }
                Duration::from_secs_f64((n - inner.tokens) / self.refill_rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Current balance after refill. Used by least-busy selection.
    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock().expect("token bucket lock poisoned");
        self.refill(&mut inner);
        inner.tokens
    }

    /// Burst ceiling.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}
