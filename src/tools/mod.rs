//! Tool registry, shared context, and the parallel executor.

pub mod context;
pub mod files;
pub mod registry;
pub mod search;
pub mod validate;
pub mod vision;

pub use context::{Attachment, SharedContext, ToolContext};
pub use registry::{schemas, ToolKind};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::keys::CredentialPool;
use crate::sanitize::Sanitizer;
use crate::transport::StreamTransport;
use crate::types::ToolCall;

/// Flattened outcome of one tool call, reinjected into the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub result: String,
}

impl ToolResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: result.into(),
        }
    }

    pub fn failed(result: impl Into<String>) -> Self {
        Self {
            success: false,
            result: result.into(),
        }
    }
}

/// Executes the tool calls of one model turn against the shared context.
///
/// All calls of a turn run concurrently on their own tasks; results come back
/// in call order, and a panic or failure in one handler never disturbs its
/// siblings.
#[derive(Clone)]
pub struct Toolbox {
    context: SharedContext,
    pool: Arc<dyn CredentialPool>,
    transport: Arc<dyn StreamTransport>,
    sanitizer: Arc<dyn Sanitizer>,
    max_result_len: usize,
}

impl Toolbox {
    pub fn new(
        context: SharedContext,
        pool: Arc<dyn CredentialPool>,
        transport: Arc<dyn StreamTransport>,
        sanitizer: Arc<dyn Sanitizer>,
        max_result_len: usize,
    ) -> Self {
        Self {
            context,
            pool,
            transport,
            sanitizer,
            max_result_len,
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Fan out every call onto its own task, then join in call order.
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let handles: Vec<JoinHandle<ToolResult>> = calls
            .iter()
            .map(|call| {
                let toolbox = self.clone();
                let call = call.clone();
                tokio::spawn(async move { toolbox.execute(&call).await })
            })
            .collect();
        join_in_order(calls, handles, cancel).await
    }

    /// Dispatch one call through the registry and cap the result length.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            return ToolResult::failed(format!("Unknown tool: {}", call.name));
        };
        debug!(tool = %kind, id = %call.id, "executing tool");
        let mut result = match kind {
            ToolKind::CreateFile => files::create_file(&self.context, &call.input),
            ToolKind::EditFile => files::edit_file(&self.context, &call.input),
            ToolKind::ViewFile => files::view_file(&self.context, &call.input),
            ToolKind::RunCommand => validate::run_command(&self.context, &call.input),
            ToolKind::SearchWeb => search::search_web(&call.input).await,
            ToolKind::SearchGithub => search::search_github(&call.input).await,
            ToolKind::SearchNpm => search::search_npm(&call.input).await,
            ToolKind::AnalyzeImage => {
                vision::analyze_image(
                    &self.context,
                    &self.pool,
                    &self.transport,
                    self.sanitizer.as_ref(),
                    &call.input,
                )
                .await
            }
        };
        cap_result(&mut result.result, self.max_result_len);
        result
    }
}

/// Join spawned handlers in call order. A `JoinError` (panicked or aborted
/// task) becomes a failed result for that slot only; cancellation aborts the
/// rest without losing results already joined.
async fn join_in_order(
    calls: &[ToolCall],
    handles: Vec<JoinHandle<ToolResult>>,
    cancel: &CancellationToken,
) -> Vec<ToolResult> {
    let mut results = Vec::with_capacity(handles.len());
    let mut canceled = cancel.is_cancelled();
    for (call, mut handle) in calls.iter().zip(handles) {
        if canceled {
            handle.abort();
            results.push(ToolResult::failed("Tool execution canceled"));
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                handle.abort();
                canceled = true;
                results.push(ToolResult::failed("Tool execution canceled"));
            }
            joined = &mut handle => results.push(match joined {
                Ok(result) => result,
                Err(err) => {
                    warn!(tool = %call.name, error = %err, "tool task crashed");
                    ToolResult::failed(format!("Tool {} crashed during execution", call.name))
                }
            }),
        }
    }
    results
}

/// Cap a result string to `max_chars`, marking the cut.
fn cap_result(text: &mut String, max_chars: usize) {
    if text.chars().count() <= max_chars {
        return;
    }
    let mut capped: String = text.chars().take(max_chars).collect();
    capped.push_str("… (truncated)");
    *text = capped;
}

/// String argument by key, empty when absent or not a string.
pub(crate) fn str_arg<'a>(input: &'a Map<String, Value>, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}
