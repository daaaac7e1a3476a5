//! Resilient multi-key client layer for a rate-limited generative API
//!
//! Distributes traffic across a pool of interchangeable API credentials so
//! that per-key quota limits, transient upstream faults, and individual key
//! failures stay invisible to callers. Each key carries its own token bucket
//! (client-side pacing under the per-key QPS ceiling) and circuit breaker
//! (isolation of persistently failing keys), plus counters for observability.
//!
//! Request lifecycle:
//! 1. [`PoolClient::execute`] starts one logical operation with a fresh
//!    request id and the configured attempt budget
//! 2. [`KeyPool::acquire_key`] filters to keys whose breaker admits traffic,
//!    applies the selection strategy, and awaits the key's bucket
//! 3. The [`Transport`](upstream::Transport) performs the wire call
//! 4. The outcome is recorded against the serving key: success closes in on
//!    breaker recovery, 429 rotates without penalty, server errors and
//!    timeouts rotate and feed the breaker, auth/validation errors feed the
//!    breaker and surface immediately
//! 5. When the budget runs out the caller gets `PoolExhausted` carrying the
//!    last upstream error

pub mod breaker;
pub mod bucket;
pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod pool;
pub mod telemetry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use bucket::TokenBucket;
pub use client::PoolClient;
pub use config::PoolConfig;
pub use error::{Error, Result};
pub use key::{KeyMetrics, KeyStats};
pub use pool::{KeyHandle, KeyPool, PoolStats, Strategy};
