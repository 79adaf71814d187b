//! Incremental SSE turn parser.
//!
//! One [`TurnParser`] consumes raw response bytes for a single model turn,
//! forwarding text and thinking deltas as they arrive while accumulating
//! tool-call fragments keyed by the provider's block/call index. Nothing is
//! buffered beyond the line in flight and the per-call argument buffers, so
//! memory stays bounded by the largest in-flight tool call.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AetherError, Result};
use crate::provider::{anthropic, openai, Provider};
use crate::types::{ParsedTurn, StopReason, StreamDelta, ToolCall, Usage};

/// A tool call still being assembled from streamed fragments.
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Explicit state machine over one turn's SSE stream.
pub struct TurnParser {
    provider: Provider,
    /// Bytes held back until they complete a UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded text not yet split into lines.
    buffer: String,
    text: String,
    thinking: String,
    calls: BTreeMap<u64, PartialCall>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    done: bool,
}

impl TurnParser {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            pending: Vec::new(),
            buffer: String::new(),
            text: String::new(),
            thinking: String::new(),
            calls: BTreeMap::new(),
            stop_reason: None,
            usage: Usage::default(),
            done: false,
        }
    }

    /// Whether the provider signaled end of stream.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning any deltas that should be forwarded
    /// immediately.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamDelta>> {
        self.decode(chunk);

        let mut deltas = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim().to_string();
            self.buffer = self.buffer[line_end + 1..].to_string();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            // Only "data:" lines carry payload; "event:" framing adds nothing.
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                self.done = true;
                continue;
            }
            self.handle_frame(data, &mut deltas)?;
        }
        Ok(deltas)
    }

    /// Consume the parser and produce the normalized turn.
    pub fn finish(mut self) -> ParsedTurn {
        if !self.buffer.trim().is_empty() {
            debug!(
                fragment_len = self.buffer.len(),
                "discarding dangling stream fragment"
            );
        }

        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for (index, partial) in std::mem::take(&mut self.calls) {
            if partial.name.is_empty() {
                warn!(index, "dropping tool-call fragment with no name");
                continue;
            }
            tool_calls.push(ToolCall::from_fragments(
                partial.id,
                partial.name,
                &partial.arguments,
            ));
        }

        // An explicit provider signal wins; "end" with calls present is a
        // gateway quirk that still means tool use.
        let stop_reason = match self.stop_reason {
            Some(StopReason::End) if !tool_calls.is_empty() => StopReason::ToolUse,
            Some(reason) => reason,
            None if !tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::End,
        };

        ParsedTurn {
            text: self.text,
            thinking: self.thinking,
            tool_calls,
            stop_reason,
            usage: self.usage,
        }
    }

    /// Append bytes to the line buffer, holding back any incomplete UTF-8
    /// sequence at the chunk boundary.
    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        match std::str::from_utf8(&self.pending) {
            Ok(valid) => {
                self.buffer.push_str(valid);
                self.pending.clear();
            }
            Err(err) if err.error_len().is_none() => {
                let tail = self.pending.split_off(err.valid_up_to());
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending = tail;
            }
            Err(_) => {
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.clear();
            }
        }
    }

    fn handle_frame(&mut self, data: &str, deltas: &mut Vec<StreamDelta>) -> Result<()> {
        let event = match serde_json::from_str::<Value>(data) {
            Ok(event) => event,
            Err(_) => {
                debug!(frame = data, "skipping unparseable frame");
                return Ok(());
            }
        };
        match self.provider {
            Provider::Anthropic => self.apply_anthropic(&event, deltas),
            Provider::OpenAi => self.apply_openai(&event, deltas),
        }
    }

    fn apply_anthropic(&mut self, event: &Value, deltas: &mut Vec<StreamDelta>) -> Result<()> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        match event_type {
            "message_start" => {
                if let Some(input) = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.input_tokens = input as u32;
                }
            }
            "content_block_start" => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                if let Some(block) = event.get("content_block") {
                    if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        let entry = self.calls.entry(index).or_default();
                        if let Some(id) = block.get("id").and_then(Value::as_str) {
                            entry.id = id.to_string();
                        }
                        if let Some(name) = block.get("name").and_then(Value::as_str) {
                            entry.name = name.to_string();
                        }
                    }
                }
            }
            "content_block_delta" => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let Some(delta) = event.get("delta") else {
                    return Ok(());
                };
                match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            self.text.push_str(text);
                            deltas.push(StreamDelta::Text(text.to_string()));
                        }
                    }
                    "thinking_delta" => {
                        if let Some(thinking) = delta.get("thinking").and_then(Value::as_str) {
                            self.thinking.push_str(thinking);
                            deltas.push(StreamDelta::Thinking(thinking.to_string()));
                        }
                    }
                    "input_json_delta" => {
                        if let Some(json) = delta.get("partial_json").and_then(Value::as_str) {
                            self.calls.entry(index).or_default().arguments.push_str(json);
                        }
                    }
                    // Thinking signatures are not replayable from a stream.
                    "signature_delta" => {}
                    _ => {}
                }
            }
            "content_block_stop" => {}
            "message_delta" => {
                if let Some(stop) = event
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                    .and_then(anthropic::parse_stop_reason)
                {
                    self.stop_reason = Some(stop);
                }
                if let Some(output) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = output as u32;
                }
            }
            "message_stop" => {
                self.done = true;
            }
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("provider reported an error mid-stream");
                return Err(AetherError::Stream(message.to_string()));
            }
            // "ping" and future event types
            _ => {}
        }
        Ok(())
    }

    fn apply_openai(&mut self, event: &Value, deltas: &mut Vec<StreamDelta>) -> Result<()> {
        if let Some(error) = event.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider reported an error mid-stream");
            return Err(AetherError::Stream(message.to_string()));
        }

        // The usage-only final chunk has an empty choices array.
        if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
            if let Some(input) = usage.get("prompt_tokens").and_then(Value::as_u64) {
                self.usage.input_tokens = input as u32;
            }
            if let Some(output) = usage.get("completion_tokens").and_then(Value::as_u64) {
                self.usage.output_tokens = output as u32;
            }
        }

        let Some(choice) = event.pointer("/choices/0") else {
            return Ok(());
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(Value::as_str) {
                if !content.is_empty() {
                    self.text.push_str(content);
                    deltas.push(StreamDelta::Text(content.to_string()));
                }
            }
            if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
                if !reasoning.is_empty() {
                    self.thinking.push_str(reasoning);
                    deltas.push(StreamDelta::Thinking(reasoning.to_string()));
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in tool_calls {
                    let Some(index) = tc.get("index").and_then(Value::as_u64) else {
                        debug!("tool-call fragment without index, skipping");
                        continue;
                    };
                    let entry = self.calls.entry(index).or_default();
                    if let Some(id) = tc.get("id").and_then(Value::as_str) {
                        entry.id = id.to_string();
                    }
                    if let Some(name) = tc.pointer("/function/name").and_then(Value::as_str) {
                        entry.name.push_str(name);
                    }
                    if let Some(args) = tc.pointer("/function/arguments").and_then(Value::as_str)
                    {
                        entry.arguments.push_str(args);
                    }
                }
            }
        }

        if let Some(stop) = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .and_then(openai::parse_finish_reason)
        {
            self.stop_reason = Some(stop);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut TurnParser, frames: &[&str]) -> Vec<StreamDelta> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend(parser.feed(frame.as_bytes()).unwrap());
        }
        out
    }

    // ── anthropic framing ──────────────────────────────────────────────

    #[test]
    fn anthropic_text_deltas_forward_immediately() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        let deltas = feed_all(
            &mut parser,
            &[
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":7}}\n\n",
                "data: {\"type\":\"message_stop\"}\n\n",
            ],
        );
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Text("Hel".into()),
                StreamDelta::Text("lo".into()),
            ]
        );
        assert!(parser.is_done());
        let turn = parser.finish();
        assert_eq!(turn.text, "Hello");
        assert_eq!(turn.stop_reason, StopReason::End);
        assert_eq!(turn.usage.output_tokens, 7);
    }

    #[test]
    fn anthropic_tool_arguments_accumulate_across_frames() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        feed_all(
            &mut parser,
            &[
                "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"create_file\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"pa\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"th\\\": \\\"app.js\\\"}\"}}\n\n",
                "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":11}}\n\n",
            ],
        );
        let turn = parser.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "toolu_1");
        assert_eq!(turn.tool_calls[0].name, "create_file");
        assert_eq!(turn.tool_calls[0].input["path"], "app.js");
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn anthropic_thinking_deltas_are_separated_from_text() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        let deltas = feed_all(
            &mut parser,
            &[
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"sig\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"answer\"}}\n\n",
            ],
        );
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Thinking("hmm".into()),
                StreamDelta::Text("answer".into()),
            ]
        );
        let turn = parser.finish();
        assert_eq!(turn.thinking, "hmm");
        assert_eq!(turn.text, "answer");
    }

    #[test]
    fn anthropic_malformed_arguments_become_empty_input() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        feed_all(
            &mut parser,
            &[
                "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_9\",\"name\":\"create_file\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\": \\\"a.js\\\", \\\"content\"}}\n\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{}}\n\n",
            ],
        );
        let turn = parser.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        assert!(turn.tool_calls[0].input.is_empty());
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn anthropic_max_tokens_stop_survives_pending_calls() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        feed_all(
            &mut parser,
            &[
                "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_2\",\"name\":\"create_file\"}}\n\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"max_tokens\"},\"usage\":{\"output_tokens\":4096}}\n\n",
            ],
        );
        let turn = parser.finish();
        assert_eq!(turn.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn anthropic_error_event_fails_the_turn() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        let err = parser
            .feed(b"data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n")
            .unwrap_err();
        assert!(matches!(err, AetherError::Stream(_)));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn anthropic_usage_combines_start_and_delta() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        feed_all(
            &mut parser,
            &[
                "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":321}}}\n\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":55}}\n\n",
            ],
        );
        let turn = parser.finish();
        assert_eq!(turn.usage.input_tokens, 321);
        assert_eq!(turn.usage.output_tokens, 55);
    }

    // ── openai framing ─────────────────────────────────────────────────

    #[test]
    fn openai_parallel_tool_calls_accumulate_by_index() {
        let mut parser = TurnParser::new(Provider::OpenAi);
        feed_all(
            &mut parser,
            &[
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"search_web\",\"arguments\":\"\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"create_file\",\"arguments\":\"\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\": \"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"function\":{\"arguments\":\"{\\\"path\\\": \\\"a.css\\\"}\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"rust\\\"}\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
                "data: [DONE]\n\n",
            ],
        );
        assert!(parser.is_done());
        let turn = parser.finish();
        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[0].id, "call_a");
        assert_eq!(turn.tool_calls[0].input["query"], "rust");
        assert_eq!(turn.tool_calls[1].name, "create_file");
        assert_eq!(turn.tool_calls[1].input["path"], "a.css");
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn openai_text_and_reasoning_deltas() {
        let mut parser = TurnParser::new(Provider::OpenAi);
        let deltas = feed_all(
            &mut parser,
            &[
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"let me see\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"sure\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":40,\"completion_tokens\":12}}\n\n",
                "data: [DONE]\n\n",
            ],
        );
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Thinking("let me see".into()),
                StreamDelta::Text("sure".into()),
            ]
        );
        let turn = parser.finish();
        assert_eq!(turn.text, "sure");
        assert_eq!(turn.thinking, "let me see");
        assert_eq!(turn.stop_reason, StopReason::End);
        assert_eq!(turn.usage.input_tokens, 40);
        assert_eq!(turn.usage.output_tokens, 12);
    }

    #[test]
    fn openai_error_frame_fails_the_turn() {
        let mut parser = TurnParser::new(Provider::OpenAi);
        let err = parser
            .feed(b"data: {\"error\":{\"message\":\"The server is overloaded\",\"type\":\"server_error\"}}\n\n")
            .unwrap_err();
        assert!(matches!(err, AetherError::Stream(_)));
    }

    #[test]
    fn openai_length_finish_reports_max_tokens() {
        let mut parser = TurnParser::new(Provider::OpenAi);
        feed_all(
            &mut parser,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\n",
                "data: [DONE]\n\n",
            ],
        );
        assert_eq!(parser.finish().stop_reason, StopReason::MaxTokens);
    }

    // ── framing edge cases ─────────────────────────────────────────────

    #[test]
    fn frames_split_mid_line_parse_identically() {
        let whole = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"split me\"}}\n\n";
        let mut whole_parser = TurnParser::new(Provider::Anthropic);
        let whole_deltas = whole_parser.feed(whole.as_bytes()).unwrap();

        let mut split_parser = TurnParser::new(Provider::Anthropic);
        let mut split_deltas = Vec::new();
        for piece in [&whole[..10], &whole[10..17], &whole[17..]] {
            split_deltas.extend(split_parser.feed(piece.as_bytes()).unwrap());
        }
        assert_eq!(whole_deltas, split_deltas);
        assert_eq!(whole_parser.finish(), split_parser.finish());
    }

    #[test]
    fn multibyte_utf8_split_across_chunks_survives() {
        let frame = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"héllo\"}}\n\n";
        let bytes = frame.as_bytes();
        // Split inside the two-byte é sequence.
        let split_at = frame.find('é').unwrap() + 1;
        let mut parser = TurnParser::new(Provider::Anthropic);
        let mut deltas = Vec::new();
        deltas.extend(parser.feed(&bytes[..split_at]).unwrap());
        deltas.extend(parser.feed(&bytes[split_at..]).unwrap());
        assert_eq!(deltas, vec![StreamDelta::Text("héllo".into())]);
    }

    #[test]
    fn unparseable_frames_are_skipped() {
        let mut parser = TurnParser::new(Provider::OpenAi);
        let deltas = feed_all(
            &mut parser,
            &[
                "data: this is not json\n\n",
                ": keepalive comment\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            ],
        );
        assert_eq!(deltas, vec![StreamDelta::Text("ok".into())]);
    }

    #[test]
    fn dangling_fragment_at_eof_is_discarded() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        parser
            .feed(b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"done\"}}\n\ndata: {\"type\":\"content_block")
            .unwrap();
        let turn = parser.finish();
        assert_eq!(turn.text, "done");
        assert_eq!(turn.stop_reason, StopReason::End);
    }

    #[test]
    fn nameless_fragments_are_dropped_at_finish() {
        let mut parser = TurnParser::new(Provider::Anthropic);
        parser
            .feed(b"data: {\"type\":\"content_block_delta\",\"index\":3,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{}\"}}\n\n")
            .unwrap();
        let turn = parser.finish();
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.stop_reason, StopReason::End);
    }
}
