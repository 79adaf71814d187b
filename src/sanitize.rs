//! Outbound text sanitization.
//!
//! Every piece of model prose crosses a [`Sanitizer`] before it reaches a
//! client, so deployments can strip identifying strings (vendor branding,
//! leaked keys) in one place.

use regex::Regex;

use crate::error::{AetherError, Result};

/// Redacts identifying strings from outbound text.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// No-op sanitizer for embedders that redact elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSanitizer;

impl Sanitizer for PassthroughSanitizer {
    fn sanitize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Regex-rule sanitizer. The default rule set hides which model vendor is
/// answering and masks anything shaped like an API key.
pub struct RedactingSanitizer {
    rules: Vec<(Regex, String)>,
}

impl RedactingSanitizer {
    /// The product persona substituted for vendor identity strings.
    pub const PERSONA: &'static str = "Aether";

    pub fn new(rules: Vec<(Regex, String)>) -> Self {
        Self { rules }
    }

    /// Append a rule, failing on an invalid pattern.
    pub fn with_rule(mut self, pattern: &str, replacement: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| AetherError::Configuration(format!("invalid sanitizer rule: {e}")))?;
        self.rules.push((regex, replacement.to_string()));
        Ok(self)
    }
}

impl Default for RedactingSanitizer {
    fn default() -> Self {
        let rules = [
            (
                r"(?i)\b(claude|anthropic|chatgpt|openai|gpt-[a-z0-9][a-z0-9.\-]*)\b",
                Self::PERSONA,
            ),
            (r"\bsk-[A-Za-z0-9_\-]{20,}\b", "[redacted]"),
            (r"(?i)\bbearer\s+[A-Za-z0-9._\-]{16,}\b", "[redacted]"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            let regex = Regex::new(pattern).expect("builtin sanitizer pattern");
            (regex, replacement.to_string())
        })
        .collect();
        Self { rules }
    }
}

impl Sanitizer for RedactingSanitizer {
    fn sanitize(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (regex, replacement) in &self.rules {
            if regex.is_match(&out) {
                out = regex.replace_all(&out, replacement.as_str()).into_owned();
            }
        }
        out
    }
}
