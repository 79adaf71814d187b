//! Anthropic Messages API adapter.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::keys::Credential;
use crate::types::{
    ChatMessage, ContentBlock, MessageContent, ParsedTurn, Role, StopReason, ToolCall, Usage,
};

use super::{ProviderPayload, RequestOptions, ThinkingMode, ToolChoice, ToolSchema};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Build a Messages API request for the given transcript.
pub(crate) fn build_payload(
    credential: &Credential,
    system: &str,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
    options: &RequestOptions,
    stream: bool,
) -> ProviderPayload {
    let base = credential
        .base_url
        .as_deref()
        .unwrap_or(DEFAULT_BASE_URL);
    ProviderPayload {
        url: format!("{base}/messages"),
        headers: request_headers(credential),
        body: build_request_body(&credential.model, system, messages, tools, options, stream),
    }
}

/// Messages API headers. A key that cannot be header-encoded is skipped;
/// the server's 401 then reports it.
fn request_headers(credential: &Credential) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
    if let Ok(key) = HeaderValue::from_str(&credential.api_key) {
        headers.insert("x-api-key", key);
    }
    headers
}

fn build_request_body(
    model: &str,
    system: &str,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
    options: &RequestOptions,
    stream: bool,
) -> Value {
    // Forcing a tool call exists to guarantee structured output; thinking is
    // incompatible with it on this API, so the forced choice wins.
    let thinking = options.thinking_enabled() && !options.forced_tool_choice();

    let mut system_parts = Vec::new();
    if !system.is_empty() {
        system_parts.push(system.to_string());
    }
    let mut wire_messages = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system_parts.push(msg.text());
            }
            Role::User => {
                wire_messages.push(json!({
                    "role": "user",
                    "content": user_content(&msg.content),
                }));
            }
            Role::Assistant => {
                if let Some(content) = assistant_content(&msg.content) {
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": content,
                    }));
                }
            }
        }
    }

    let max_tokens = if thinking {
        // Thinking needs output budget beyond its own allowance.
        let budget = match options.thinking {
            Some(ThinkingMode::Enabled { budget_tokens }) => budget_tokens,
            _ => 0,
        };
        let min = std::cmp::max(16_384, budget + 4096);
        std::cmp::max(options.max_tokens.unwrap_or(min), min)
    } else {
        options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    };

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
        "max_tokens": max_tokens,
        "stream": stream,
    });

    let obj = body.as_object_mut().unwrap();

    if !system_parts.is_empty() {
        obj.insert("system".into(), system_parts.join("\n").into());
    }
    if let Some(temp) = options.temperature {
        // Temperature is not allowed when thinking is enabled.
        if !thinking {
            obj.insert("temperature".into(), temp.into());
        }
    }
    if thinking {
        if let Some(ThinkingMode::Enabled { budget_tokens }) = options.thinking {
            obj.insert(
                "thinking".into(),
                json!({"type": "enabled", "budget_tokens": budget_tokens}),
            );
        }
    }
    if let Some(ref tool_choice) = options.tool_choice {
        let choice = match tool_choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::Required => json!({"type": "any"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        };
        obj.insert("tool_choice".into(), choice);
    }
    if !tools.is_empty() {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        obj.insert("tools".into(), tool_defs.into());
    }

    body
}

/// User-side content: a single text block collapses to a plain string.
fn user_content(content: &MessageContent) -> Value {
    let blocks = match content {
        MessageContent::Text(text) => return Value::String(text.clone()),
        MessageContent::Blocks(blocks) => blocks,
    };
    if let [ContentBlock::Text { text }] = blocks.as_slice() {
        return Value::String(text.clone());
    }

    let parts: Vec<Value> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentBlock::Image { source } => Some(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": source.media_type,
                    "data": source.data,
                }
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            })),
            _ => None,
        })
        .collect();

    json!(parts)
}

/// Assistant-side content. Returns None for a message with nothing to send,
/// which the Messages API rejects.
fn assistant_content(content: &MessageContent) -> Option<Value> {
    let blocks = match content {
        MessageContent::Text(text) => {
            if text.is_empty() {
                return None;
            }
            return Some(Value::String(text.clone()));
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let parts: Vec<Value> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => {
                if text.is_empty() {
                    None
                } else {
                    Some(json!({"type": "text", "text": text}))
                }
            }
            ContentBlock::ToolUse { id, name, input } => Some(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            })),
            // Streamed thinking carries no signature, so it cannot be
            // replayed on this API.
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(json!(parts))
    }
}

/// Map a Messages API stop reason onto the normalized enum.
pub(crate) fn parse_stop_reason(s: &str) -> Option<StopReason> {
    match s {
        "end_turn" | "stop_sequence" => Some(StopReason::End),
        "max_tokens" => Some(StopReason::MaxTokens),
        "tool_use" => Some(StopReason::ToolUse),
        _ => None,
    }
}

/// Parse a non-streaming Messages API response.
pub(crate) fn parse_completion(body: &Value) -> Result<ParsedTurn> {
    let data: MessagesResponse = serde_json::from_value(body.clone())?;

    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls = Vec::new();

    for block in data.content {
        match block.r#type.as_str() {
            "text" => {
                if let Some(t) = block.text {
                    text.push_str(&t);
                }
            }
            "thinking" => {
                if let Some(t) = block.thinking {
                    thinking.push_str(&t);
                }
            }
            "tool_use" => {
                if let (Some(id), Some(name)) = (block.id, block.name) {
                    let input = block
                        .input
                        .and_then(|v| v.as_object().cloned())
                        .unwrap_or_default();
                    tool_calls.push(ToolCall { id, name, input });
                }
            }
            _ => {}
        }
    }

    let stop_reason = data
        .stop_reason
        .as_deref()
        .and_then(parse_stop_reason)
        .unwrap_or(if tool_calls.is_empty() {
            StopReason::End
        } else {
            StopReason::ToolUse
        });

    let usage = data
        .usage
        .map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        })
        .unwrap_or_default();

    Ok(ParsedTurn {
        text,
        thinking,
        tool_calls,
        stop_reason,
        usage,
    })
}

// Internal Messages API response types

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<MessagesContentBlock>,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct MessagesContentBlock {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}
