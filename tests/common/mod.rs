//! Shared test helpers: a scripted transport and SSE body builders.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use aether::error::{AetherError, Result};
use aether::keys::{Credential, CredentialPool, StaticCredentialPool};
use aether::provider::{Provider, ProviderPayload};
use aether::transport::{ByteStream, StreamTransport};

/// One scripted upstream exchange, consumed per streaming request.
pub enum Script {
    /// Stream these chunks, then end the stream cleanly.
    Stream(Vec<Vec<u8>>),
    /// Fail before any bytes flow, like a non-200 response.
    Fail(AetherError),
    /// Never yield anything; exercises the idle watchdog.
    Stall,
}

/// Transport that replays scripted responses instead of making HTTP calls.
///
/// Scripts are consumed in order, one per `fetch_stream`. Request bodies are
/// captured so tests can assert on the wire shape the engine produced.
pub struct ScriptedTransport {
    scripts: Mutex<Vec<Script>>,
    bodies: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts),
            bodies: Mutex::new(Vec::new()),
        })
    }

    /// Bodies of every streaming request made so far, in order.
    pub fn request_bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn fetch_stream(&self, payload: ProviderPayload) -> Result<ByteStream> {
        self.bodies.lock().unwrap().push(payload.body.clone());
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                return Err(AetherError::Stream("no scripted response left".into()));
            }
            scripts.remove(0)
        };
        match script {
            Script::Stream(chunks) => {
                Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            Script::Fail(err) => Err(err),
            Script::Stall => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn fetch_json(&self, _payload: ProviderPayload) -> Result<serde_json::Value> {
        Err(AetherError::Stream(
            "scripted transport has no JSON responses".into(),
        ))
    }
}

/// Pool that records rate-limit reports, delegating acquisition to a static
/// single-credential pool.
pub struct RecordingPool {
    inner: StaticCredentialPool,
    reports: Mutex<Vec<Option<Duration>>>,
}

impl RecordingPool {
    pub fn new(credential: Credential) -> Arc<Self> {
        Arc::new(Self {
            inner: StaticCredentialPool::new(credential),
            reports: Mutex::new(Vec::new()),
        })
    }

    pub fn rate_limit_reports(&self) -> Vec<Option<Duration>> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialPool for RecordingPool {
    async fn acquire(&self) -> Result<Credential> {
        self.inner.acquire().await
    }

    async fn report_rate_limited(&self, credential: &Credential, retry_after: Option<Duration>) {
        self.reports.lock().unwrap().push(retry_after);
        self.inner.report_rate_limited(credential, retry_after).await;
    }
}

pub fn anthropic_credential() -> Credential {
    Credential::new(Provider::Anthropic, "sk-ant-test", "claude-sonnet-4-20250514")
}

fn frame(event: serde_json::Value) -> String {
    format!("data: {event}\n\n")
}

/// Anthropic-shaped SSE body for a turn that streams `text` and then ends
/// with `stop_reason`. The text rides in one delta; callers chunk the body
/// bytes to exercise reassembly.
pub fn anthropic_text_turn(text: &str, stop_reason: &str) -> Vec<u8> {
    let mut body = frame(serde_json::json!({
        "type": "message_start",
        "message": {"usage": {"input_tokens": 25}}
    }));
    body.push_str(&frame(serde_json::json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "text_delta", "text": text}
    })));
    body.push_str(&frame(serde_json::json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason},
        "usage": {"output_tokens": 9}
    })));
    body.push_str(&frame(serde_json::json!({"type": "message_stop"})));
    body.into_bytes()
}

/// Anthropic-shaped SSE body for a turn that requests the given tool calls.
pub fn anthropic_tool_turn(calls: &[(&str, &str, serde_json::Value)]) -> Vec<u8> {
    let mut body = frame(serde_json::json!({
        "type": "message_start",
        "message": {"usage": {"input_tokens": 40}}
    }));
    for (index, (id, name, input)) in calls.iter().enumerate() {
        body.push_str(&frame(serde_json::json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "tool_use", "id": id, "name": name}
        })));
        body.push_str(&frame(serde_json::json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "input_json_delta", "partial_json": input.to_string()}
        })));
        body.push_str(&frame(serde_json::json!({
            "type": "content_block_stop",
            "index": index
        })));
    }
    body.push_str(&frame(serde_json::json!({
        "type": "message_delta",
        "delta": {"stop_reason": "tool_use"},
        "usage": {"output_tokens": 30}
    })));
    body.push_str(&frame(serde_json::json!({"type": "message_stop"})));
    body.into_bytes()
}

/// Split a body into small chunks so tests exercise incremental feeding.
pub fn chunked(body: Vec<u8>, size: usize) -> Vec<Vec<u8>> {
    body.chunks(size).map(<[u8]>::to_vec).collect()
}
