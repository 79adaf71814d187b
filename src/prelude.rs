//! Convenience re-exports for common use.

pub use crate::engine::{
    ClientEvent, Engine, EngineConfig, EngineOutcome, EngineRequest, FileArtifact, RunHandle,
    RunStatus, StatusPhase,
};
pub use crate::error::{AetherError, Result};
pub use crate::keys::{Credential, CredentialPool, EnvCredentialPool, StaticCredentialPool};
pub use crate::provider::{Provider, RequestOptions, ThinkingMode, ToolChoice, ToolSchema};
pub use crate::tools::{Attachment, SharedContext, ToolContext, ToolKind, ToolResult, Toolbox};
pub use crate::types::{
    ChatMessage, ContentBlock, MessageContent, ParsedTurn, Role, StopReason, StreamDelta,
    ToolCall, Usage,
};
