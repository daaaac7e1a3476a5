//! HTTP transport over reqwest
//!
//! Posts the opaque JSON payload to a fixed endpoint with a bearer
//! credential and translates the exchange into the [`TransportError`]
//! taxonomy. The response body is returned as raw JSON; a body that fails to
//! parse is kept as a JSON string so callers still see what upstream sent.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use tracing::debug;

use crate::classify::{classify_status, parse_retry_after};
use crate::{ErrorClass, Response, Result, Transport, TransportError};

/// Production transport: JSON POST to a single upstream endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport posting to `endpoint` with a shared client.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

/// Translate a completed HTTP exchange into the transport outcome.
///
/// Success statuses pass the body through; everything else maps via
/// [`classify_status`], with 401/403 separated out as credential rejections.
fn interpret(status: u16, retry_after: Option<&str>, body: serde_json::Value) -> Result<Response> {
    if (200..300).contains(&status) {
        return Ok(Response { status, body });
    }
    match classify_status(status) {
        ErrorClass::RateLimit => Err(TransportError::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        }),
        ErrorClass::Retryable => Err(TransportError::Server { status }),
        ErrorClass::Fatal => {
            if status == 401 || status == 403 {
                Err(TransportError::Auth { status })
            } else {
                Err(TransportError::Validation { status })
            }
        }
    }
}

/// Map a reqwest failure (no HTTP status observed) onto the taxonomy.
fn map_send_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn call<'a>(
        &'a self,
        credential: &'a Secret<String>,
        payload: &'a serde_json::Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(credential.expose())
                .json(payload)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| map_send_error(&e))?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            let text = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

            // Keep unparseable bodies as a raw string rather than failing the call
            let body = serde_json::from_slice(&text).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&text).into_owned())
            });

            debug!(status, "upstream exchange completed");
            interpret(status, retry_after.as_deref(), body)
        })
    }
}
