//! Retrying orchestrator
//!
//! Executes one logical operation against the upstream API: acquire a key,
//! delegate to the transport, interpret the outcome, and rotate to another
//! key on transient failure, bounded by the attempt budget. The loop is
//! iterative with an explicit counter, so the control flow is linearly
//! boundable and the terminal outcome is always one of: a response, a
//! `PoolExhausted` error carrying the last upstream error, or the original
//! non-retryable error.
//!
//! Policy: non-retryable (auth/validation) failures are recorded against the
//! serving key's breaker before surfacing. A one-off malformed payload costs
//! a single tally that the next success resets, while a revoked credential
//! keeps failing until its circuit opens and the key is isolated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use upstream::{ErrorClass, Response, Transport, TransportError};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::pool::KeyPool;
use crate::telemetry;

/// Client executing logical operations over a shared key pool.
pub struct PoolClient {
    pool: Arc<KeyPool>,
    transport: Arc<dyn Transport>,
    max_attempts: u32,
    request_timeout: Duration,
}

impl PoolClient {
    pub fn new(
        pool: Arc<KeyPool>,
        transport: Arc<dyn Transport>,
        max_attempts: u32,
        request_timeout: Duration,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        Ok(Self {
            pool,
            transport,
            max_attempts,
            request_timeout,
        })
    }

    /// Convenience constructor taking budgets from validated configuration.
    pub fn from_config(
        pool: Arc<KeyPool>,
        transport: Arc<dyn Transport>,
        config: &PoolConfig,
    ) -> Result<Self> {
        Self::new(pool, transport, config.max_attempts, config.request_timeout())
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Execute `operation` with the configured attempt budget.
    pub async fn execute(&self, operation: &str, payload: &serde_json::Value) -> Result<Response> {
        self.execute_with_attempts(operation, payload, self.max_attempts)
            .await
    }

    /// Execute `operation`, rotating across keys for up to `max_attempts`
    /// transport calls.
    ///
    /// Rate-limit and server/timeout outcomes advance to the next attempt
    /// immediately (the only pacing is the next key's bucket). Auth and
    /// validation outcomes are surfaced at once: a different key cannot fix
    /// a malformed request, and a bad credential is better isolated by its
    /// own breaker than hammered with retries.
    pub async fn execute_with_attempts(
        &self,
        operation: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
    ) -> Result<Response> {
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        let request_id = Uuid::new_v4();
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=max_attempts {
            let handle = match self.pool.acquire_key().await {
                Ok(handle) => handle,
                Err(Error::PoolExhausted {
                    total, available, ..
                }) => {
                    warn!(
                        operation,
                        %request_id,
                        attempt,
                        available,
                        total,
                        "no eligible key"
                    );
                    telemetry::record_exhausted();
                    return Err(Error::PoolExhausted {
                        attempts: attempt - 1,
                        total,
                        available,
                        last: last_error,
                    });
                }
                Err(other) => return Err(other),
            };

            let start = Instant::now();
            let outcome = self
                .transport
                .call(handle.credential(), payload, self.request_timeout)
                .await;
            let latency = start.elapsed();
            let latency_ms = latency.as_millis() as u64;

            match outcome {
                Ok(response) => {
                    self.pool.record_success(&handle, latency, response.status);
                    telemetry::record_attempt("success", handle.key_id(), latency);
                    debug!(
                        operation,
                        %request_id,
                        key_id = handle.key_id(),
                        attempt,
                        latency_ms,
                        status = response.status,
                        "attempt succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    let status = err.status();
                    match err.class() {
                        ErrorClass::RateLimit => {
                            self.pool.record_rate_limit(&handle, latency);
                            telemetry::record_attempt("rate_limit", handle.key_id(), latency);
                            warn!(
                                operation,
                                %request_id,
                                key_id = handle.key_id(),
                                attempt,
                                latency_ms,
                                status = 429,
                                "key throttled, rotating"
                            );
                            last_error = Some(err);
                        }
                        ErrorClass::Retryable => {
                            self.pool.record_failure(&handle, latency, status);
                            telemetry::record_attempt("retryable", handle.key_id(), latency);
                            warn!(
                                operation,
                                %request_id,
                                key_id = handle.key_id(),
                                attempt,
                                latency_ms,
                                status,
                                error = %err,
                                "attempt failed, rotating"
                            );
                            last_error = Some(err);
                        }
                        ErrorClass::Fatal => {
                            self.pool.record_failure(&handle, latency, status);
                            telemetry::record_attempt("fatal", handle.key_id(), latency);
                            warn!(
                                operation,
                                %request_id,
                                key_id = handle.key_id(),
                                attempt,
                                latency_ms,
                                status,
                                error = %err,
                                "non-retryable failure"
                            );
                            return Err(Error::NonRetryable(err));
                        }
                    }
                }
            }
        }

        warn!(
            operation,
            %request_id,
            attempts = max_attempts,
            "attempt budget exhausted"
        );
        telemetry::record_exhausted();
        Err(self.pool.exhausted(max_attempts, last_error))
    }
}
