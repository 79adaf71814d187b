//! The turn loop: model call, stream parse, tool execution, repeat.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use strum::Display;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::compact;
use crate::error::{AetherError, Result};
use crate::keys::CredentialPool;
use crate::provider::{self, Provider, ProviderPayload, RequestOptions, ThinkingMode};
use crate::sanitize::{RedactingSanitizer, Sanitizer};
use crate::stream::TurnParser;
use crate::tools::{self, Attachment, ToolContext, ToolKind, Toolbox};
use crate::transport::{HttpTransport, StreamTransport};
use crate::types::{ChatMessage, ContentBlock, ParsedTurn, Role, StopReason, StreamDelta, Usage};

use super::events::{ClientEvent, FileArtifact, StatusPhase};

/// Engine tuning knobs. Defaults match production behavior.
#[derive(Debug, Clone, Builder)]
pub struct EngineConfig {
    /// Hard ceiling on model turns per run.
    #[builder(default = 15)]
    pub max_iterations: usize,
    /// Token budget the transcript is compacted toward between turns.
    #[builder(default = 100_000)]
    pub token_budget: u32,
    /// Cap on each tool result string fed back to the model.
    #[builder(default = 4_000)]
    pub max_tool_result_len: usize,
    /// Abort a turn when the upstream stream goes quiet this long. Zero
    /// disables the watchdog.
    #[builder(default = 120_000)]
    pub stream_idle_timeout_ms: u64,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub thinking: Option<ThinkingMode>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One client request: the new prompt plus everything carried over.
#[derive(Debug, Builder)]
#[builder(on(String, into))]
pub struct EngineRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// Prior conversation, already compacted or not; the engine compacts
    /// again as needed.
    #[builder(default)]
    pub history: Vec<ChatMessage>,
    /// Existing project files to seed the virtual file table.
    #[builder(default)]
    pub files: BTreeMap<String, String>,
    #[builder(default)]
    pub attachments: Vec<Attachment>,
    pub project_id: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// The model finished naturally.
    Completed,
    /// The model hit its token ceiling; output is partial but usable.
    Truncated,
    /// The iteration ceiling stopped a loop that kept requesting tools.
    IterationLimit,
    Canceled,
    Failed,
}

/// Final summary of a run, delivered after the event stream closes.
#[derive(Debug, Clone, Serialize)]
pub struct EngineOutcome {
    pub status: RunStatus,
    pub files: BTreeMap<String, String>,
    pub iterations: usize,
    pub usage: Usage,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl EngineOutcome {
    fn finished(
        status: RunStatus,
        files: BTreeMap<String, String>,
        iterations: usize,
        usage: Usage,
    ) -> Self {
        Self {
            status,
            files,
            iterations,
            usage,
            error: None,
            finished_at: Utc::now(),
        }
    }

    fn failed(
        message: String,
        files: BTreeMap<String, String>,
        iterations: usize,
        usage: Usage,
    ) -> Self {
        Self {
            status: RunStatus::Failed,
            files,
            iterations,
            usage,
            error: Some(message),
            finished_at: Utc::now(),
        }
    }

    fn dropped() -> Self {
        Self::failed(
            "engine task dropped before finishing".to_string(),
            BTreeMap::new(),
            0,
            Usage::default(),
        )
    }
}

/// Live handle to a running engine task.
pub struct RunHandle {
    run_id: Uuid,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    outcome: oneshot::Receiver<EngineOutcome>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Request cancellation; in-flight upstream reads and tool tasks stop.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Next client event, or `None` once the stream has closed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Wait for the run to finish, discarding any unread events.
    pub async fn wait(mut self) -> EngineOutcome {
        self.events.close();
        self.outcome.await.unwrap_or_else(|_| EngineOutcome::dropped())
    }

    /// Consume the handle as a stream of client events.
    pub fn into_events(self) -> UnboundedReceiverStream<ClientEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Consume the handle as encoded SSE frames, ready to write to a client
    /// response body.
    pub fn into_frames(self) -> impl Stream<Item = String> {
        let mut events = self.events;
        async_stream::stream! {
            while let Some(event) = events.recv().await {
                yield event.to_frame();
            }
        }
    }
}

/// Drives multi-turn tool-using runs against whichever provider the
/// credential pool hands out.
pub struct Engine {
    config: EngineConfig,
    pool: Arc<dyn CredentialPool>,
    transport: Arc<dyn StreamTransport>,
    sanitizer: Arc<dyn Sanitizer>,
}

impl Engine {
    pub fn new(config: EngineConfig, pool: Arc<dyn CredentialPool>) -> Self {
        Self {
            config,
            pool,
            transport: Arc::new(HttpTransport),
            sanitizer: Arc::new(RedactingSanitizer::default()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Start a run on its own task and return a handle to it.
    pub fn start(&self, request: EngineRequest) -> RunHandle {
        let run_id = Uuid::new_v4();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let worker = RunWorker {
            run_id,
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            transport: Arc::clone(&self.transport),
            sanitizer: Arc::clone(&self.sanitizer),
            events: event_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            let outcome = worker.run(request).await;
            let _ = outcome_tx.send(outcome);
        });

        RunHandle {
            run_id,
            events: event_rx,
            outcome: outcome_rx,
            cancel,
        }
    }
}

struct RunWorker {
    run_id: Uuid,
    config: EngineConfig,
    pool: Arc<dyn CredentialPool>,
    transport: Arc<dyn StreamTransport>,
    sanitizer: Arc<dyn Sanitizer>,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
}

enum TurnEnd {
    Turn(Box<ParsedTurn>),
    Canceled,
}

impl RunWorker {
    async fn run(self, request: EngineRequest) -> EngineOutcome {
        debug!(run_id = %self.run_id, "run start");
        let context = ToolContext {
            files: request.files,
            project_id: request.project_id,
            attachments: request.attachments.clone(),
        }
        .shared();
        let toolbox = Toolbox::new(
            Arc::clone(&context),
            Arc::clone(&self.pool),
            Arc::clone(&self.transport),
            Arc::clone(&self.sanitizer),
            self.config.max_tool_result_len,
        );

        let mut messages = request.history;
        messages.push(user_message(&request.prompt, &request.attachments));
        let tool_schemas = tools::schemas();

        let mut usage = Usage::default();
        let mut iterations = 0usize;

        let (status, error) = loop {
            if self.cancel.is_cancelled() {
                break (RunStatus::Canceled, None);
            }
            if iterations >= self.config.max_iterations {
                debug!(run_id = %self.run_id, iterations, "iteration ceiling reached");
                break (RunStatus::IterationLimit, None);
            }
            iterations += 1;

            compact::compact_transcript(&mut messages, self.config.token_budget);

            let credential = match self.pool.acquire().await {
                Ok(credential) => credential,
                Err(err) => break (RunStatus::Failed, Some(err)),
            };
            let options = RequestOptions {
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                thinking: self.config.thinking,
                tool_choice: None,
            };
            let payload = provider::build_request(
                &credential,
                &request.system_prompt,
                &messages,
                &tool_schemas,
                &options,
            );

            let turn = match self.stream_turn(credential.provider, payload).await {
                Ok(TurnEnd::Turn(turn)) => *turn,
                Ok(TurnEnd::Canceled) => break (RunStatus::Canceled, None),
                Err(err) => {
                    if let AetherError::RateLimited { retry_after_ms } = &err {
                        self.pool
                            .report_rate_limited(
                                &credential,
                                retry_after_ms.map(Duration::from_millis),
                            )
                            .await;
                    }
                    break (RunStatus::Failed, Some(err));
                }
            };
            usage.merge(&turn.usage);
            debug!(
                run_id = %self.run_id,
                iteration = iterations,
                tool_calls = turn.tool_calls.len(),
                stop_reason = %turn.stop_reason,
                "turn complete"
            );

            if turn.tool_calls.is_empty() {
                if !turn.text.is_empty() {
                    messages.push(ChatMessage::assistant(turn.text));
                }
                let status = match turn.stop_reason {
                    StopReason::MaxTokens => RunStatus::Truncated,
                    _ => RunStatus::Completed,
                };
                break (status, None);
            }

            self.emit_iteration_status(&turn);
            for call in &turn.tool_calls {
                self.emit(ClientEvent::ToolCall {
                    tool: call.name.clone(),
                    input: call.input.clone(),
                });
            }

            let results = toolbox.execute_all(&turn.tool_calls, &self.cancel).await;
            for (call, result) in turn.tool_calls.iter().zip(&results) {
                self.emit(ClientEvent::ToolResult {
                    tool: call.name.clone(),
                    success: result.success,
                    result: result.result.clone(),
                });
            }

            messages.push(ChatMessage::assistant_turn(&turn.text, &turn.tool_calls));
            messages.push(ChatMessage::tool_results(
                turn.tool_calls
                    .iter()
                    .zip(results)
                    .map(|(call, result)| (call.id.clone(), result.result))
                    .collect(),
            ));

            // Tools ran, but the turn itself was cut off; going around again
            // with a truncated transcript only compounds the damage.
            if turn.stop_reason == StopReason::MaxTokens {
                break (RunStatus::Truncated, None);
            }
        };

        let files = tools::context::lock(&context).files.clone();
        let error_text = error.map(|err| {
            warn!(run_id = %self.run_id, error = %err, "run failed");
            self.sanitizer.sanitize(&err.to_string())
        });
        if let Some(message) = &error_text {
            self.emit(ClientEvent::Error {
                error: message.clone(),
            });
        } else if !files.is_empty() {
            self.emit(ClientEvent::FilesUpdated {
                files: files
                    .iter()
                    .map(|(path, content)| FileArtifact::new(path.clone(), content.clone()))
                    .collect(),
            });
        }
        self.emit(ClientEvent::Done);
        debug!(run_id = %self.run_id, status = %status, iterations, "run finished");

        match error_text {
            Some(message) => EngineOutcome::failed(message, files, iterations, usage),
            None => EngineOutcome::finished(status, files, iterations, usage),
        }
    }

    /// One status event per phase per iteration, in first-use order.
    fn emit_iteration_status(&self, turn: &ParsedTurn) {
        let mut seen: Vec<StatusPhase> = Vec::new();
        for call in &turn.tool_calls {
            let Some(kind) = ToolKind::from_name(&call.name) else {
                continue;
            };
            let phase = StatusPhase::for_tool(kind);
            if !seen.contains(&phase) {
                seen.push(phase);
                self.emit(ClientEvent::Status { phase });
            }
        }
    }

    /// Issue the streaming call and pump the parser, forwarding deltas as
    /// they arrive. Returns the normalized turn at end of stream.
    async fn stream_turn(
        &self,
        provider: Provider,
        payload: ProviderPayload,
    ) -> Result<TurnEnd> {
        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(TurnEnd::Canceled),
            result = self.transport.fetch_stream(payload) => result?,
        };

        let mut parser = TurnParser::new(provider);
        let idle_ms = self.config.stream_idle_timeout_ms;
        let mut idle_sleep =
            (idle_ms > 0).then(|| Box::pin(time::sleep(Duration::from_millis(idle_ms))));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(TurnEnd::Canceled),
                // A disabled watchdog (idle_ms == 0) never fires.
                _ = async {
                    match idle_sleep.as_mut() {
                        Some(sleep) => sleep.await,
                        None => std::future::pending().await,
                    }
                } => {
                    return Err(AetherError::Timeout(idle_ms));
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break; };
                    let chunk = chunk?;
                    if let Some(ref mut sleep) = idle_sleep {
                        sleep.as_mut().reset(
                            time::Instant::now() + Duration::from_millis(idle_ms),
                        );
                    }
                    for delta in parser.feed(&chunk)? {
                        match delta {
                            StreamDelta::Text(text) => self.emit(ClientEvent::Text {
                                text: self.sanitizer.sanitize(&text),
                            }),
                            StreamDelta::Thinking(text) => self.emit(ClientEvent::Thinking {
                                text: self.sanitizer.sanitize(&text),
                            }),
                        }
                    }
                }
            }
        }

        Ok(TurnEnd::Turn(Box::new(parser.finish())))
    }

    fn emit(&self, event: ClientEvent) {
        // A dropped receiver means nobody is listening; the run still
        // finishes so the outcome stays accurate.
        let _ = self.events.send(event);
    }
}

/// The new user message, with any attachments embedded ahead of the prompt.
fn user_message(prompt: &str, attachments: &[Attachment]) -> ChatMessage {
    if attachments.is_empty() {
        return ChatMessage::user(prompt);
    }
    let mut blocks: Vec<ContentBlock> = attachments.iter().map(Attachment::to_block).collect();
    blocks.push(ContentBlock::Text {
        text: prompt.to_string(),
    });
    ChatMessage::blocks(Role::User, blocks)
}
