//! Image analysis through a secondary, non-streaming vision completion.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;
use crate::keys::CredentialPool;
use crate::provider::{self, RequestOptions};
use crate::sanitize::Sanitizer;
use crate::transport::StreamTransport;
use crate::types::{ChatMessage, ContentBlock, Role};

use super::context::{self, Attachment, SharedContext};
use super::{str_arg, ToolResult};

const VISION_SYSTEM_PROMPT: &str =
    "You analyze images attached to a build session. Answer the requested task \
     directly, describing only what the image shows.";
const VISION_MAX_TOKENS: u32 = 1_024;
const DEFAULT_TASK: &str = "Describe this image in detail.";

pub(crate) async fn analyze_image(
    ctx: &SharedContext,
    pool: &Arc<dyn CredentialPool>,
    transport: &Arc<dyn StreamTransport>,
    sanitizer: &dyn Sanitizer,
    input: &Map<String, Value>,
) -> ToolResult {
    let index = input.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
    let task = match str_arg(input, "task").trim() {
        "" => DEFAULT_TASK,
        task => task,
    };

    let (attachment, available) = {
        let guard = context::lock(ctx);
        (guard.attachments.get(index).cloned(), guard.attachments.len())
    };
    let Some(attachment) = attachment else {
        return ToolResult::failed(format!(
            "No attached image at index {index} ({available} attachment(s) available)"
        ));
    };

    match describe(pool, transport, &attachment, task).await {
        Ok(text) if text.is_empty() => {
            ToolResult::failed("The vision model returned no description")
        }
        Ok(text) => ToolResult::ok(sanitizer.sanitize(&text)),
        Err(err) => {
            warn!(error = %err, index, "image analysis failed");
            ToolResult::failed(format!("Image analysis failed: {err}"))
        }
    }
}

async fn describe(
    pool: &Arc<dyn CredentialPool>,
    transport: &Arc<dyn StreamTransport>,
    attachment: &Attachment,
    task: &str,
) -> Result<String> {
    let credential = pool.acquire().await?;
    let message = ChatMessage::blocks(
        Role::User,
        vec![
            attachment.to_block(),
            ContentBlock::Text {
                text: task.to_string(),
            },
        ],
    );
    let options = RequestOptions::builder().max_tokens(VISION_MAX_TOKENS).build();
    let payload = provider::build_completion_request(
        &credential,
        VISION_SYSTEM_PROMPT,
        &[message],
        &[],
        &options,
    );
    let body = transport.fetch_json(payload).await?;
    let turn = provider::parse_completion(credential.provider, &body)?;
    Ok(turn.text.trim().to_string())
}
