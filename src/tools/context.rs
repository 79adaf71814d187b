//! Request-scoped state shared by every tool call in a run.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::types::{ContentBlock, ImageSource};

/// An image supplied with the user request, addressed by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub media_type: String,
    /// Base64-encoded bytes, ready for either provider's wire shape.
    pub data: String,
}

impl Attachment {
    pub fn new(media_type: impl Into<String>, base64_data: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: base64_data.into(),
        }
    }

    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// Embed this attachment as a message content block.
    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::Image {
            source: ImageSource {
                media_type: self.media_type.clone(),
                data: self.data.clone(),
            },
        }
    }
}

/// Virtual file table plus attachments for one run.
///
/// Tools read and write the file table; the engine owns the context and
/// reports `files` as the final artifact set when the loop ends. Nothing here
/// outlives the request.
#[derive(Debug, Default)]
pub struct ToolContext {
    pub files: BTreeMap<String, String>,
    pub project_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: BTreeMap<String, String>) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }

    pub fn shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }
}

/// Handle cloned into every spawned tool task.
pub type SharedContext = Arc<Mutex<ToolContext>>;

/// Lock the context. A poisoned lock still yields the data; a panicked tool
/// task must not wedge the rest of the run.
pub(crate) fn lock(ctx: &SharedContext) -> MutexGuard<'_, ToolContext> {
    ctx.lock().unwrap_or_else(|e| e.into_inner())
}
