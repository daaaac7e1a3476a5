//! Prometheus metrics exposition
//!
//! Registers and exposes the pool's operational metrics:
//!
//! - `keypool_attempts_total` (counter): labels `outcome`, `key_id`
//! - `keypool_request_duration_seconds` (histogram): label `outcome`
//! - `keypool_exhausted_total` (counter): no labels

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `keypool_request_duration_seconds` with explicit buckets so it
/// renders as a Prometheus histogram (with `_bucket` lines) rather than the
/// default summary. Boundaries cover 5ms to 60s, matching the configurable
/// per-attempt timeout range.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "keypool_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record one completed attempt with its outcome and the key that served it.
///
/// `outcome` is one of `success`, `rate_limit`, `retryable`, `fatal`.
pub fn record_attempt(outcome: &'static str, key_id: &str, latency: Duration) {
    metrics::counter!(
        "keypool_attempts_total",
        "outcome" => outcome,
        "key_id" => key_id.to_string(),
    )
    .increment(1);
    metrics::histogram!("keypool_request_duration_seconds", "outcome" => outcome)
        .record(latency.as_secs_f64());
}

/// Record a terminal pool-exhausted outcome.
pub fn record_exhausted() {
    metrics::counter!("keypool_exhausted_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // With no recorder installed, metrics calls are no-ops.
        record_attempt("success", "key-1", Duration::from_millis(40));
        record_exhausted();
    }

    /// Create an isolated recorder/handle pair for unit tests. Only one
    /// global recorder can exist per process, so tests use a local one.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    "keypool_request_duration_seconds".to_string(),
                ),
                &[
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                ],
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_attempt_writes_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_attempt("success", "key-1", Duration::from_millis(42));
        record_attempt("rate_limit", "key-2", Duration::from_millis(7));

        let output = handle.render();
        assert!(output.contains("keypool_attempts_total"));
        assert!(output.contains("outcome=\"success\""));
        assert!(output.contains("outcome=\"rate_limit\""));
        assert!(output.contains("key_id=\"key-1\""));
        assert!(output.contains("key_id=\"key-2\""));
        assert!(
            output.contains("keypool_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
    }

    #[test]
    fn record_exhausted_increments_counter() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_exhausted();
        record_exhausted();

        let output = handle.render();
        assert!(output.contains("keypool_exhausted_total 2"), "{output}");
    }
}
