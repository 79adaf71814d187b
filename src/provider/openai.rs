//! OpenAI Chat Completions API adapter.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::keys::Credential;
use crate::types::{
    ChatMessage, ContentBlock, MessageContent, ParsedTurn, Role, StopReason, ToolCall, Usage,
};

use super::{ProviderPayload, RequestOptions, ToolChoice, ToolSchema};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Build a Chat Completions request for the given transcript.
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
        url: format!("{base}/chat/completions"),
        headers: request_headers(credential),
        body: build_request_body(&credential.model, system, messages, tools, options, stream),
    }
}

/// Chat Completions headers. A key that cannot be header-encoded is
/// skipped; the server's 401 then reports it.
fn request_headers(credential: &Credential) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", credential.api_key)) {
        headers.insert(AUTHORIZATION, bearer);
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
    let mut wire_messages = Vec::new();
    if !system.is_empty() {
        wire_messages.push(json!({"role": "system", "content": system}));
    }
    for msg in messages {
        wire_messages.extend(message_to_wire(msg));
    }

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
        "stream": stream,
    });

    let obj = body.as_object_mut().unwrap();

    if stream {
        // Ask for the final usage chunk.
        obj.insert("stream_options".into(), json!({"include_usage": true}));
    }
    if let Some(max) = options.max_tokens {
        obj.insert("max_tokens".into(), max.into());
    }
    if let Some(temp) = options.temperature {
        obj.insert("temperature".into(), temp.into());
    }
    if options.thinking_enabled() {
        obj.insert("reasoning_effort".into(), "medium".into());
    }
    if let Some(ref tool_choice) = options.tool_choice {
        let choice = match tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        };
        obj.insert("tool_choice".into(), choice);
    }
    if !tools.is_empty() {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        obj.insert("tools".into(), tool_defs.into());
    }

    body
}

/// Convert one canonical message into its wire form. A user message holding
/// tool-result blocks fans out into one "tool" message per result.
fn message_to_wire(msg: &ChatMessage) -> Vec<Value> {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            return vec![json!({"role": role, "content": text})];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    // Assistant tool calls live on the message, not in content parts.
    if msg.role == Role::Assistant {
        let tool_calls: Vec<Value> = blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": Value::Object(input.clone()).to_string(),
                    }
                })),
                _ => None,
            })
            .collect();
        if !tool_calls.is_empty() {
            let text = msg.text();
            return vec![json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { Value::String(text) },
                "tool_calls": tool_calls,
            })];
        }
    }

    let mut wire = Vec::new();
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                parts.push(json!({"type": "text", "text": text}));
            }
            ContentBlock::Image { source } => {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", source.media_type, source.data),
                    }
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
            _ => {}
        }
    }
    if !parts.is_empty() {
        wire.push(json!({"role": role, "content": parts}));
    }
    wire
}

/// Map a Chat Completions finish reason onto the normalized enum.
pub(crate) fn parse_finish_reason(s: &str) -> Option<StopReason> {
    match s {
        "stop" | "content_filter" => Some(StopReason::End),
        "length" => Some(StopReason::MaxTokens),
        "tool_calls" | "function_call" => Some(StopReason::ToolUse),
        _ => None,
    }
}

/// Parse a non-streaming Chat Completions response.
pub(crate) fn parse_completion(body: &Value) -> Result<ParsedTurn> {
    let data: ChatResponse = serde_json::from_value(body.clone())?;
    let choice = data.choices.into_iter().next();

    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = choice {
        if let Some(content) = choice.message.content {
            text.push_str(&content);
        }
        if let Some(reasoning) = choice.message.reasoning_content {
            thinking.push_str(&reasoning);
        }
        for tc in choice.message.tool_calls.unwrap_or_default() {
            tool_calls.push(ToolCall::from_fragments(
                tc.id,
                tc.function.name,
                &tc.function.arguments,
            ));
        }
        stop_reason = choice.finish_reason.as_deref().and_then(parse_finish_reason);
    }

    let stop_reason = stop_reason.unwrap_or(if tool_calls.is_empty() {
        StopReason::End
    } else {
        StopReason::ToolUse
    });

    let usage = data
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
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

// Chat Completions response types (internal)

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Deserialize)]
struct ChatFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
