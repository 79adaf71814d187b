//! Normalized turn output shared by both provider protocols.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;
use tracing::warn;
use uuid::Uuid;

/// A complete tool invocation request parsed from a model turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
}

impl ToolCall {
    /// Assemble a call from streamed fragments. A missing id is synthesized;
    /// a malformed argument buffer degrades to an empty input so the handler
    /// can surface its own validation error.
    pub fn from_fragments(id: String, name: String, raw_arguments: &str) -> Self {
        let id = if id.is_empty() {
            format!("call_{}", Uuid::new_v4().simple())
        } else {
            id
        };
        let input = lenient_arguments(&name, raw_arguments);
        Self { id, name, input }
    }
}

/// Parse buffered tool-call arguments, tolerating malformed output.
pub(crate) fn lenient_arguments(name: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                tool = name,
                value_type = value_kind(&other),
                "non-object tool arguments, substituting empty input"
            );
            Map::new()
        }
        Err(err) => {
            let preview: String = raw.chars().take(80).collect();
            warn!(
                tool = name,
                %err,
                preview,
                "unparseable tool arguments, substituting empty input"
            );
            Map::new()
        }
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Why the model stopped emitting output, reduced to the three cases the
/// turn loop acts on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// The model requested tool execution.
    ToolUse,
    /// The model finished its answer.
    End,
    /// Output was cut off by the token limit.
    MaxTokens,
}

/// An increment forwarded to the caller while a turn is still streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
}

/// Token usage for a single turn, accumulated across a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Everything a finished model turn produced, in normalized form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTurn {
    /// Visible assistant text, concatenated across deltas.
    pub text: String,
    /// Reasoning text, when the model streamed any.
    pub thinking: String,
    /// Tool calls in provider emission order.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl ParsedTurn {
    /// Whether the turn loop should execute tools and go around again.
    pub fn wants_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse && !self.tool_calls.is_empty()
    }
}
