//! Client-facing event stream types and their SSE encoding.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::Display;

use crate::tools::ToolKind;

/// Coarse activity phase shown while tools run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StatusPhase {
    Searching,
    Creating,
    Editing,
    Analyzing,
    Running,
}

impl StatusPhase {
    pub fn for_tool(kind: ToolKind) -> Self {
        match kind {
            ToolKind::CreateFile => Self::Creating,
            ToolKind::EditFile => Self::Editing,
            ToolKind::ViewFile | ToolKind::AnalyzeImage => Self::Analyzing,
            ToolKind::RunCommand => Self::Running,
            ToolKind::SearchWeb | ToolKind::SearchGithub | ToolKind::SearchNpm => Self::Searching,
        }
    }
}

/// A generated file as reported to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileArtifact {
    pub path: String,
    pub language: String,
    pub content: String,
}

impl FileArtifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = language_for(&path).to_string();
        Self {
            path,
            language,
            content: content.into(),
        }
    }
}

/// Display language for a file path, by extension.
fn language_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("") {
        "html" | "htm" => "html",
        "css" => "css",
        "js" => "javascript",
        "jsx" => "jsx",
        "ts" => "typescript",
        "tsx" => "tsx",
        "json" => "json",
        "md" => "markdown",
        "py" => "python",
        "svg" => "svg",
        _ => "plaintext",
    }
}

/// One frame of the client event stream.
///
/// The JSON shapes are part of the wire contract: most events carry a `type`
/// tag, but assistant prose goes out as a bare `{"text": ...}` and errors as
/// a bare `{"error": ...}`, so encoding is written out by hand instead of
/// derived.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Status { phase: StatusPhase },
    ToolCall { tool: String, input: Map<String, Value> },
    ToolResult { tool: String, success: bool, result: String },
    Thinking { text: String },
    Text { text: String },
    FilesUpdated { files: Vec<FileArtifact> },
    Error { error: String },
    Done,
}

impl ClientEvent {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Status { phase } => json!({ "type": "status", "phase": phase.to_string() }),
            Self::ToolCall { tool, input } => {
                json!({ "type": "tool_call", "tool": tool, "input": input })
            }
            Self::ToolResult {
                tool,
                success,
                result,
            } => json!({ "type": "tool_result", "tool": tool, "success": success, "result": result }),
            Self::Thinking { text } => json!({ "type": "thinking", "text": text }),
            Self::Text { text } => json!({ "text": text }),
            Self::FilesUpdated { files } => json!({ "type": "files_updated", "files": files }),
            Self::Error { error } => json!({ "error": error }),
            Self::Done => Value::String("[DONE]".to_string()),
        }
    }

    /// Encode as one SSE frame. The terminal sentinel is the bare string
    /// `[DONE]`, not JSON.
    pub fn to_frame(&self) -> String {
        match self {
            Self::Done => "data: [DONE]\n\n".to_string(),
            other => format!("data: {}\n\n", other.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tagged_events_carry_their_type() {
        let status = ClientEvent::Status {
            phase: StatusPhase::Creating,
        };
        assert_eq!(
            status.to_json(),
            json!({ "type": "status", "phase": "creating" })
        );

        let mut input = Map::new();
        input.insert("path".into(), json!("a.html"));
        let call = ClientEvent::ToolCall {
            tool: "create_file".into(),
            input,
        };
        assert_eq!(
            call.to_json(),
            json!({ "type": "tool_call", "tool": "create_file", "input": { "path": "a.html" } })
        );

        let result = ClientEvent::ToolResult {
            tool: "create_file".into(),
            success: true,
            result: "Created a.html".into(),
        };
        assert_eq!(
            result.to_json(),
            json!({ "type": "tool_result", "tool": "create_file", "success": true, "result": "Created a.html" })
        );
    }

    #[test]
    fn prose_and_error_events_are_untagged() {
        assert_eq!(
            ClientEvent::Text { text: "hi".into() }.to_json(),
            json!({ "text": "hi" })
        );
        assert_eq!(
            ClientEvent::Error {
                error: "upstream failed".into()
            }
            .to_json(),
            json!({ "error": "upstream failed" })
        );
    }

    #[test]
    fn frames_are_data_prefixed_and_blank_line_terminated() {
        let frame = ClientEvent::Text { text: "hi".into() }.to_frame();
        assert_eq!(frame, "data: {\"text\":\"hi\"}\n\n");
        assert_eq!(ClientEvent::Done.to_frame(), "data: [DONE]\n\n");
    }

    #[test]
    fn files_updated_tags_languages() {
        let event = ClientEvent::FilesUpdated {
            files: vec![
                FileArtifact::new("index.html", "<html></html>"),
                FileArtifact::new("app.jsx", "export default x"),
                FileArtifact::new("notes", "free-form"),
            ],
        };
        let value = event.to_json();
        assert_eq!(value["files"][0]["language"], "html");
        assert_eq!(value["files"][1]["language"], "jsx");
        assert_eq!(value["files"][2]["language"], "plaintext");
    }

    #[test]
    fn every_tool_maps_to_a_phase() {
        assert_eq!(
            StatusPhase::for_tool(ToolKind::CreateFile),
            StatusPhase::Creating
        );
        assert_eq!(
            StatusPhase::for_tool(ToolKind::SearchNpm),
            StatusPhase::Searching
        );
        assert_eq!(
            StatusPhase::for_tool(ToolKind::RunCommand),
            StatusPhase::Running
        );
        assert_eq!(
            StatusPhase::for_tool(ToolKind::AnalyzeImage),
            StatusPhase::Analyzing
        );
    }
}
