//! Transcript compaction.
//!
//! Keeps long-running conversations inside a token budget by shrinking the
//! bodies of older messages in place. Messages are never removed and tool
//! pairing blocks are never touched, so a compacted transcript is still a
//! valid transcript, and compacting twice changes nothing.

use tracing::debug;

use crate::types::{ChatMessage, ContentBlock, MessageContent};

/// Newest messages always kept verbatim.
const KEEP_RECENT: usize = 4;

/// Plain text longer than this is shrunk to head + marker + tail.
const TEXT_LIMIT: usize = 1_200;
const TEXT_HEAD: usize = 600;
const TEXT_TAIL: usize = 300;

/// Tool-result block content gets a tighter budget; results are mostly
/// confirmations whose middles carry no signal.
const TOOL_RESULT_LIMIT: usize = 800;
const TOOL_RESULT_HEAD: usize = 500;
const TOOL_RESULT_TAIL: usize = 150;

const MARKER: &str = "\n…[earlier content compacted]…\n";

/// Estimate the token cost of a transcript (chars / 4, rounded up).
pub fn estimate_tokens(messages: &[ChatMessage]) -> u32 {
    let chars: usize = messages.iter().map(ChatMessage::content_chars).sum();
    chars.div_ceil(4) as u32
}

/// Shrink older message bodies until the transcript is likely to fit the
/// budget. Returns true if anything changed.
pub fn compact_transcript(messages: &mut [ChatMessage], token_budget: u32) -> bool {
    if estimate_tokens(messages) <= token_budget || messages.len() <= KEEP_RECENT {
        return false;
    }

    let cutoff = messages.len() - KEEP_RECENT;
    let mut changed = false;
    for msg in &mut messages[..cutoff] {
        changed |= compact_message(msg);
    }
    if changed {
        debug!(
            estimated_tokens = estimate_tokens(messages),
            token_budget, "compacted transcript"
        );
    }
    changed
}

fn compact_message(msg: &mut ChatMessage) -> bool {
    match &mut msg.content {
        MessageContent::Text(text) => shrink(text, TEXT_LIMIT, TEXT_HEAD, TEXT_TAIL),
        MessageContent::Blocks(blocks) => {
            let mut changed = false;
            for block in blocks {
                changed |= match block {
                    ContentBlock::Text { text } => {
                        shrink(text, TEXT_LIMIT, TEXT_HEAD, TEXT_TAIL)
                    }
                    ContentBlock::ToolResult { content, .. } => shrink(
                        content,
                        TOOL_RESULT_LIMIT,
                        TOOL_RESULT_HEAD,
                        TOOL_RESULT_TAIL,
                    ),
                    // tool_use inputs and images stay intact: inputs keep the
                    // call/result pairing meaningful, images are all payload.
                    _ => false,
                };
            }
            changed
        }
    }
}

/// Replace the middle of an oversized string with a marker, on char
/// boundaries. No-op for strings at or under the limit, which is what makes
/// compaction idempotent: head + marker + tail is always under the limit.
fn shrink(text: &mut String, limit: usize, head: usize, tail: usize) -> bool {
    if text.chars().count() <= limit {
        return false;
    }
    let head_end = char_floor(text, head);
    let tail_start = char_ceil(text, text.len().saturating_sub(tail));
    let mut out = String::with_capacity(head_end + MARKER.len() + (text.len() - tail_start));
    out.push_str(&text[..head_end]);
    out.push_str(MARKER);
    out.push_str(&text[tail_start..]);
    *text = out;
    true
}

/// Largest char boundary at or below `index`.
fn char_floor(s: &str, index: usize) -> usize {
    let mut cutoff = index.min(s.len());
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    cutoff
}

/// Smallest char boundary at or above `index`.
fn char_ceil(s: &str, index: usize) -> usize {
    let mut cutoff = index.min(s.len());
    while cutoff < s.len() && !s.is_char_boundary(cutoff) {
        cutoff += 1;
    }
    cutoff
}
