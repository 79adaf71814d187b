//! Message and content-block types for model communication.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message in a conversation transcript.
///
/// Content is either a plain string or a list of typed blocks; both upstream
/// wire formats accept either shape, so the engine preserves whichever one a
/// message was built with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a message from content blocks.
    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Assistant message carrying the model's text plus its tool-use blocks.
    pub fn assistant_turn(text: &str, calls: &[crate::types::ToolCall]) -> Self {
        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        Self::blocks(Role::Assistant, blocks)
    }

    /// User message carrying one tool-result block per executed call, in call
    /// order.
    pub fn tool_results(results: Vec<(String, String)>) -> Self {
        let blocks = results
            .into_iter()
            .map(|(tool_use_id, content)| ContentBlock::ToolResult {
                tool_use_id,
                content,
            })
            .collect();
        Self::blocks(Role::User, blocks)
    }

    /// Extract the text content, concatenating all text blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Ids of the tool-use blocks in this message, in order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Approximate content size in characters, counting every block payload.
    pub fn content_chars(&self) -> usize {
        match &self.content {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Blocks(blocks) => blocks.iter().map(ContentBlock::chars).sum(),
        }
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message content: a bare string or a sequence of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single typed block of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Thinking {
        thinking: String,
    },
}

impl ContentBlock {
    fn chars(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count(),
            Self::Image { source } => source.data.chars().count(),
            Self::ToolUse { input, .. } => {
                Value::Object(input.clone()).to_string().chars().count()
            }
            Self::ToolResult { content, .. } => content.chars().count(),
            Self::Thinking { thinking } => thinking.chars().count(),
        }
    }
}

/// Base64 image payload embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSource {
    pub media_type: String,
    pub data: String,
}
