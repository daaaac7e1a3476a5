//! End-to-end scenarios over the public API: pool construction from config,
//! client retry behavior, breaker isolation and recovery, stats reporting.
//! The transport is a scripted in-memory fake keyed by raw credential.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Secret;
use keypool::{Error, KeyPool, PoolClient, PoolConfig};
use serde_json::json;
use upstream::{Response, Transport, TransportError};

#[derive(Clone, Copy)]
enum Step {
    Ok(u16),
    RateLimit,
    Server(u16),
    Timeout,
    Auth(u16),
}

/// Per-credential scripted transport. Each call pops the next step for the
/// credential; when the script runs out, the fallback step repeats forever.
struct SequencedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallbacks: HashMap<String, Step>,
    calls: Mutex<HashMap<String, u32>>,
}

impl SequencedTransport {
    fn new(keys: &[(&str, Vec<Step>, Step)]) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(
                keys.iter()
                    .map(|(k, script, _)| (k.to_string(), script.clone().into()))
                    .collect(),
            ),
            fallbacks: keys
                .iter()
                .map(|(k, _, fallback)| (k.to_string(), *fallback))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn calls_for(&self, credential: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(credential)
            .copied()
            .unwrap_or(0)
    }
}

impl Transport for SequencedTransport {
    fn id(&self) -> &str {
        "scripted"
    }

    fn call<'a>(
        &'a self,
        credential: &'a Secret<String>,
        _payload: &'a serde_json::Value,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = upstream::Result<Response>> + Send + 'a>> {
        let credential = credential.expose().clone();
        *self.calls.lock().unwrap().entry(credential.clone()).or_insert(0) += 1;
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&credential)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.fallbacks[&credential]);
        Box::pin(async move {
            match step {
                Step::Ok(status) => Ok(Response {
                    status,
                    body: json!({"ok": true}),
                }),
                Step::RateLimit => Err(TransportError::RateLimited {
                    retry_after: Some(Duration::from_secs(1)),
                }),
                Step::Server(status) => Err(TransportError::Server { status }),
                Step::Timeout => Err(TransportError::Timeout),
                Step::Auth(status) => Err(TransportError::Auth { status }),
            }
        })
    }
}

fn config_with_keys(keys: &[&str]) -> PoolConfig {
    let mut config = PoolConfig::new(1000.0);
    config.credentials = keys.iter().map(|k| Secret::from(*k)).collect();
    config
}

fn client(config: &PoolConfig, transport: Arc<dyn Transport>) -> (Arc<KeyPool>, PoolClient) {
    let pool = Arc::new(KeyPool::from_config(config).unwrap());
    let client = PoolClient::from_config(Arc::clone(&pool), transport, config).unwrap();
    (pool, client)
}

#[tokio::test]
async fn throttled_key_is_rotated_past_and_pool_keeps_serving() {
    let config = config_with_keys(&["sk-a", "sk-b"]);
    let transport = SequencedTransport::new(&[
        ("sk-a", vec![], Step::RateLimit),
        ("sk-b", vec![], Step::Ok(200)),
    ]);
    let (pool, client) = client(&config, Arc::clone(&transport) as Arc<dyn Transport>);

    for _ in 0..4 {
        let response = client.execute("generate", &json!({"prompt": "hi"})).await.unwrap();
        assert_eq!(response.status, 200);
    }

    let stats = pool.get_stats();
    assert_eq!(stats.total_successes, 4);
    assert_eq!(stats.keys[0].rate_limit_errors, 4);
    assert_eq!(stats.keys[0].failures, 0);
    // Throttling never opens the circuit
    assert_eq!(stats.keys[0].health, "healthy");
    assert_eq!(stats.status, "healthy");
}

#[tokio::test]
async fn persistently_failing_key_is_isolated_and_traffic_moves_on() {
    let mut config = config_with_keys(&["sk-bad", "sk-b", "sk-c"]);
    config.failure_threshold = 2;
    let transport = SequencedTransport::new(&[
        ("sk-bad", vec![], Step::Server(503)),
        ("sk-b", vec![], Step::Ok(200)),
        ("sk-c", vec![], Step::Ok(200)),
    ]);
    let (pool, client) = client(&config, Arc::clone(&transport) as Arc<dyn Transport>);

    for _ in 0..8 {
        client.execute("generate", &json!({})).await.unwrap();
    }

    // Two failures opened the breaker; the key saw no traffic afterwards
    assert_eq!(transport.calls_for("sk-bad"), 2);
    let stats = pool.get_stats();
    assert_eq!(stats.total_successes, 8);
    assert_eq!(stats.keys[0].failures, 2);
    assert_eq!(stats.keys[0].health, "failed");
    assert_eq!(stats.status, "degraded");
}

#[tokio::test]
async fn opened_key_recovers_after_timeout() {
    let transport = SequencedTransport::new(&[(
        "sk-a",
        vec![Step::Server(500)],
        Step::Ok(200),
    )]);
    let pool = {
        // Sub-second recovery for the test: build keys directly
        let breaker = keypool::BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
            success_threshold: 1,
        };
        let keys = vec![keypool::KeyMetrics::new(
            "key-1",
            Secret::from("sk-a"),
            keypool::TokenBucket::new(1000.0).unwrap(),
            keypool::CircuitBreaker::new(breaker).unwrap(),
        )];
        Arc::new(KeyPool::new(keys, keypool::Strategy::RoundRobin).unwrap())
    };
    let client = PoolClient::new(
        Arc::clone(&pool),
        Arc::clone(&transport) as Arc<dyn Transport>,
        3,
        Duration::from_secs(5),
    )
    .unwrap();

    // First operation: the only key fails and its breaker opens, leaving
    // no eligible key for the second attempt
    let err = client.execute("generate", &json!({})).await.unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { attempts: 1, .. }));
    assert_eq!(pool.get_stats().keys[0].health, "failed");

    tokio::time::sleep(Duration::from_millis(60)).await;

    // Recovery window elapsed: selection admits a probe, it succeeds, and
    // the breaker closes again
    let response = client.execute("generate", &json!({})).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(pool.get_stats().keys[0].health, "healthy");
}

#[tokio::test]
async fn timeouts_rotate_and_skip_the_status_histogram() {
    let config = config_with_keys(&["sk-a", "sk-b"]);
    let transport = SequencedTransport::new(&[
        ("sk-a", vec![Step::Timeout], Step::Ok(200)),
        ("sk-b", vec![], Step::Ok(200)),
    ]);
    let (pool, client) = client(&config, Arc::clone(&transport) as Arc<dyn Transport>);

    let response = client.execute("generate", &json!({})).await.unwrap();
    assert_eq!(response.status, 200);

    let stats = pool.get_stats();
    assert_eq!(stats.keys[0].failures, 1);
    assert!(stats.keys[0].response_codes.is_empty());
    assert_eq!(stats.keys[1].successes, 1);
}

#[tokio::test]
async fn exhaustion_reports_attempts_and_last_error() {
    let mut config = config_with_keys(&["sk-a", "sk-b"]);
    config.max_attempts = 4;
    config.failure_threshold = 10;
    let transport = SequencedTransport::new(&[
        ("sk-a", vec![], Step::Server(502)),
        ("sk-b", vec![], Step::Server(503)),
    ]);
    let (pool, client) = client(&config, Arc::clone(&transport) as Arc<dyn Transport>);

    let err = client.execute("generate", &json!({})).await.unwrap_err();
    match err {
        Error::PoolExhausted {
            attempts,
            total,
            available,
            last,
        } => {
            assert_eq!(attempts, 4);
            assert_eq!(total, 2);
            assert_eq!(available, 2);
            // Round-robin alternates a/b/a/b, so the last error is key-b's
            assert!(matches!(last, Some(TransportError::Server { status: 503 })));
        }
        other => panic!("expected PoolExhausted, got {other:?}"),
    }
    assert_eq!(pool.get_stats().total_failures, 4);
}

#[tokio::test]
async fn revoked_credential_fails_fast_then_trips_its_breaker() {
    let mut config = config_with_keys(&["sk-revoked", "sk-b"]);
    config.failure_threshold = 2;
    let transport = SequencedTransport::new(&[
        ("sk-revoked", vec![], Step::Auth(401)),
        ("sk-b", vec![], Step::Ok(200)),
    ]);
    let (pool, client) = client(&config, Arc::clone(&transport) as Arc<dyn Transport>);

    // Auth errors surface immediately and count toward the breaker. The
    // cursor alternates keys, so operations 1 and 3 hit the revoked key and
    // its second failure opens the breaker
    for round in 0..2 {
        let err = client.execute("generate", &json!({})).await.unwrap_err();
        assert!(
            matches!(err, Error::NonRetryable(TransportError::Auth { status: 401 })),
            "round {round}: {err:?}"
        );
        let response = client.execute("generate", &json!({})).await.unwrap();
        assert_eq!(response.status, 200);
    }
    assert_eq!(pool.get_stats().keys[0].health, "failed");

    // The bad key is now skipped and the pool serves from the healthy one
    let response = client.execute("generate", &json!({})).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(transport.calls_for("sk-revoked"), 2);
}

#[tokio::test]
async fn stats_are_stable_between_reads() {
    let config = config_with_keys(&["sk-a", "sk-b"]);
    let transport = SequencedTransport::new(&[
        ("sk-a", vec![Step::RateLimit], Step::Ok(200)),
        ("sk-b", vec![], Step::Ok(200)),
    ]);
    let (pool, client) = client(&config, Arc::clone(&transport) as Arc<dyn Transport>);

    for _ in 0..3 {
        client.execute("generate", &json!({})).await.unwrap();
    }

    let first = pool.get_stats();
    let second = pool.get_stats();
    assert_eq!(first, second);
    assert_eq!(
        first.total_requests,
        first.total_successes + first.total_failures + first.total_rate_limit_errors
    );
}
