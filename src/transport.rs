//! HTTP transport seam between provider adapters and the stream parser.
//!
//! Adapters build a [`ProviderPayload`]; a [`StreamTransport`] carries it over
//! the wire. Tests swap in scripted transports, so nothing above this layer
//! ever needs a live endpoint.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::error::{AetherError, Result};
use crate::provider::ProviderPayload;

/// Raw response bytes as they arrive from the wire.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Whole-request deadline, connect through end of body.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Process-wide reqwest client. Connection pools survive across runs, so
/// back-to-back turns against one provider reuse their sockets.
pub(crate) fn shared_client() -> &'static reqwest::Client {
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()
            .expect("static client options are valid")
    })
}

/// Carries built requests to a provider endpoint.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// POST the payload and return the response body as a byte stream.
    /// Non-2xx responses surface as typed errors before any bytes flow.
    async fn fetch_stream(&self, payload: ProviderPayload) -> Result<ByteStream>;

    /// POST the payload and return the parsed JSON response body.
    async fn fetch_json(&self, payload: ProviderPayload) -> Result<serde_json::Value>;
}

/// Production transport over the shared reqwest client.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn fetch_stream(&self, payload: ProviderPayload) -> Result<ByteStream> {
        debug!(url = %payload.url, "streaming request");
        let resp = send(payload).await?;
        Ok(resp
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(AetherError::Network(e)),
            })
            .boxed())
    }

    async fn fetch_json(&self, payload: ProviderPayload) -> Result<serde_json::Value> {
        debug!(url = %payload.url, "completion request");
        Ok(send(payload).await?.json().await?)
    }
}

/// POST the payload, turning any non-success status into a typed error.
async fn send(payload: ProviderPayload) -> Result<reqwest::Response> {
    let resp = shared_client()
        .post(&payload.url)
        .headers(payload.headers)
        .json(&payload.body)
        .send()
        .await?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(error_for_status(status.as_u16(), &body))
}

/// Classify an error status, mining 429 bodies for the provider's retry hint.
fn error_for_status(status: u16, body: &str) -> AetherError {
    match status {
        401 | 403 => AetherError::Authentication(body.to_string()),
        429 => AetherError::RateLimited {
            retry_after_ms: retry_after_hint(body),
        },
        _ => AetherError::api(status, body),
    }
}

/// Rate-limit bodies carry `error.retry_after` in (possibly fractional)
/// seconds.
fn retry_after_hint(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let seconds = value.get("error")?.get("retry_after")?.as_f64()?;
    Some((seconds * 1000.0) as u64)
}
