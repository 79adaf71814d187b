//! Provider adapters: request building and response normalization.
//!
//! Adapters are pure with respect to the network. They translate the
//! canonical transcript into one provider's wire format and hand back a
//! [`ProviderPayload`]; the transport layer owns the actual HTTP exchange.

pub mod anthropic;
pub mod openai;

use std::str::FromStr;

use bon::Builder;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{AetherError, Result};
use crate::keys::Credential;
use crate::types::{ChatMessage, ParsedTurn};

/// The two supported wire protocols.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl Provider {
    /// Parse a provider name, failing fast on anything unrecognized.
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_str(name)
            .map_err(|_| AetherError::Configuration(format!("Unknown provider: {name}")))
    }
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Extended thinking mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ThinkingMode {
    Enabled { budget_tokens: u32 },
    Disabled,
}

/// How the model is allowed to pick tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ToolChoice {
    /// Model decides freely.
    Auto,
    /// Model must call some tool.
    Required,
    /// Model must call this specific tool.
    Tool(String),
}

impl ToolChoice {
    /// Whether this choice forces a tool call.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Required | Self::Tool(_))
    }
}

/// Per-request generation options.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default)]
pub struct RequestOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub thinking: Option<ThinkingMode>,
    pub tool_choice: Option<ToolChoice>,
}

impl RequestOptions {
    pub fn thinking_enabled(&self) -> bool {
        matches!(self.thinking, Some(ThinkingMode::Enabled { .. }))
    }

    pub fn forced_tool_choice(&self) -> bool {
        self.tool_choice.as_ref().is_some_and(ToolChoice::is_forced)
    }
}

/// A fully built HTTP request for one provider, ready for the transport.
#[derive(Debug, Clone)]
pub struct ProviderPayload {
    pub url: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Build a streaming chat request for the credential's provider.
pub fn build_request(
    credential: &Credential,
    system: &str,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
    options: &RequestOptions,
) -> ProviderPayload {
    match credential.provider {
        Provider::Anthropic => {
            anthropic::build_payload(credential, system, messages, tools, options, true)
        }
        Provider::OpenAi => {
            openai::build_payload(credential, system, messages, tools, options, true)
        }
    }
}

/// Build a non-streaming completion request (used for one-shot calls such as
/// image analysis).
pub fn build_completion_request(
    credential: &Credential,
    system: &str,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
    options: &RequestOptions,
) -> ProviderPayload {
    match credential.provider {
        Provider::Anthropic => {
            anthropic::build_payload(credential, system, messages, tools, options, false)
        }
        Provider::OpenAi => {
            openai::build_payload(credential, system, messages, tools, options, false)
        }
    }
}

/// Parse a non-streaming completion response body into a normalized turn.
pub fn parse_completion(provider: Provider, body: &serde_json::Value) -> Result<ParsedTurn> {
    match provider {
        Provider::Anthropic => anthropic::parse_completion(body),
        Provider::OpenAi => openai::parse_completion(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parse_is_case_insensitive_and_strict() {
        assert_eq!(Provider::parse("anthropic").unwrap(), Provider::Anthropic);
        assert_eq!(Provider::parse("OpenAI").unwrap(), Provider::OpenAi);
        let err = Provider::parse("mistral").unwrap_err();
        assert!(matches!(err, AetherError::Configuration(_)));
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn forced_tool_choice_detection() {
        let auto = RequestOptions::builder().tool_choice(ToolChoice::Auto).build();
        assert!(!auto.forced_tool_choice());
        let forced = RequestOptions::builder()
            .tool_choice(ToolChoice::Tool("create_file".into()))
            .build();
        assert!(forced.forced_tool_choice());
    }
}
