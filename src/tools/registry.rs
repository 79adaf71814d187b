//! Closed registry of the tools the engine exposes to the model.
//!
//! Provider-supplied tool names are mapped onto [`ToolKind`] exactly once, at
//! the dispatch boundary; anything the enum does not name is rejected there
//! instead of flowing through string dispatch.

use std::str::FromStr;

use serde_json::{json, Map, Value};
use strum::{Display, EnumString};

use crate::provider::ToolSchema;

/// Every tool the engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ToolKind {
    CreateFile,
    EditFile,
    ViewFile,
    RunCommand,
    SearchWeb,
    SearchGithub,
    SearchNpm,
    AnalyzeImage,
}

impl ToolKind {
    pub const ALL: [ToolKind; 8] = [
        ToolKind::CreateFile,
        ToolKind::EditFile,
        ToolKind::ViewFile,
        ToolKind::RunCommand,
        ToolKind::SearchWeb,
        ToolKind::SearchGithub,
        ToolKind::SearchNpm,
        ToolKind::AnalyzeImage,
    ];

    /// Map a wire tool name onto the registry.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    /// The schema advertised to the model for this tool.
    pub fn schema(self) -> ToolSchema {
        match self {
            Self::CreateFile => tool(
                self,
                "Create or overwrite a project file with the given content",
                params()
                    .string("path", "File path, e.g. index.html or src/app.jsx", true)
                    .string("content", "Full content of the file", true),
            ),
            Self::EditFile => tool(
                self,
                "Replace one exact, unique occurrence of old_str with new_str in an existing file",
                params()
                    .string("path", "Path of the file to edit", true)
                    .string(
                        "old_str",
                        "Exact text to replace; must appear exactly once in the file",
                        true,
                    )
                    .string("new_str", "Replacement text (may be empty to delete)", false),
            ),
            Self::ViewFile => tool(
                self,
                "Read the current content of a project file",
                params().string("path", "Path of the file to read", true),
            ),
            Self::RunCommand => tool(
                self,
                "Validate project files the way a build or check command would, reporting structural problems",
                params()
                    .string("command", "Command to emulate, e.g. npm run build", true)
                    .string_array(
                        "files",
                        "Specific files to check (defaults to every project file)",
                        false,
                    ),
            ),
            Self::SearchWeb => tool(
                self,
                "Search the web for current information",
                params().string("query", "Search query", true),
            ),
            Self::SearchGithub => tool(
                self,
                "Search GitHub repositories",
                params().string("query", "Search query", true),
            ),
            Self::SearchNpm => tool(
                self,
                "Search the npm registry for packages",
                params().string("query", "Search query", true),
            ),
            Self::AnalyzeImage => tool(
                self,
                "Analyze an image the user attached to this conversation",
                params()
                    .number("index", "Index of the attached image, starting at 0", true)
                    .string("task", "What to determine or describe about the image", false),
            ),
        }
    }
}

/// Schemas for every registered tool, in declaration order.
pub fn schemas() -> Vec<ToolSchema> {
    ToolKind::ALL.iter().map(|kind| kind.schema()).collect()
}

fn tool(kind: ToolKind, description: &str, parameters: ParameterBuilder) -> ToolSchema {
    ToolSchema {
        name: kind.to_string(),
        description: description.to_string(),
        parameters: parameters.build(),
    }
}

fn params() -> ParameterBuilder {
    ParameterBuilder {
        properties: Map::new(),
        required: Vec::new(),
    }
}

/// Builder for the JSON Schema object each tool advertises.
struct ParameterBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({ "type": "string", "description": description }), required)
    }

    fn number(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({ "type": "number", "description": description }), required)
    }

    fn string_array(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({
                "type": "array",
                "items": { "type": "string" },
                "description": description,
            }),
            required,
        )
    }

    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_strum() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(&kind.to_string()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("create_file"), Some(ToolKind::CreateFile));
        assert_eq!(ToolKind::from_name("transmogrify"), None);
    }

    #[test]
    fn every_schema_is_an_object_with_properties() {
        let schemas = schemas();
        assert_eq!(schemas.len(), ToolKind::ALL.len());
        for schema in &schemas {
            assert_eq!(schema.parameters["type"], "object");
            assert!(schema.parameters["properties"].is_object());
        }
    }

    #[test]
    fn create_file_requires_path_and_content() {
        let schema = ToolKind::CreateFile.schema();
        let required = schema.parameters["required"].as_array().unwrap();
        assert!(required.contains(&json!("path")));
        assert!(required.contains(&json!("content")));
    }
}
