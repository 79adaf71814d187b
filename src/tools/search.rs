//! Advisory search tools over public indices.
//!
//! Search is never load-bearing: any transport or parse failure degrades to a
//! successful result telling the model to answer from general knowledge, so a
//! dead network cannot fail a turn.

use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AetherError, Result};
use crate::transport::shared_client;

use super::{str_arg, ToolResult};

const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const GITHUB_SEARCH_URL: &str = "https://api.github.com/search/repositories";
const NPM_SEARCH_URL: &str = "https://registry.npmjs.org/-/v1/search";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESULTS: usize = 5;

pub(crate) async fn search_web(input: &Map<String, Value>) -> ToolResult {
    let query = str_arg(input, "query").trim();
    if query.is_empty() {
        return ToolResult::failed("No query provided");
    }
    match fetch_web(DUCKDUCKGO_URL, query).await {
        Ok(summary) => ToolResult::ok(summary),
        Err(err) => {
            debug!(error = %err, query, "web search degraded");
            degraded(query)
        }
    }
}

pub(crate) async fn search_github(input: &Map<String, Value>) -> ToolResult {
    let query = str_arg(input, "query").trim();
    if query.is_empty() {
        return ToolResult::failed("No query provided");
    }
    match fetch_github(GITHUB_SEARCH_URL, query).await {
        Ok(summary) => ToolResult::ok(summary),
        Err(err) => {
            debug!(error = %err, query, "github search degraded");
            degraded(query)
        }
    }
}

pub(crate) async fn search_npm(input: &Map<String, Value>) -> ToolResult {
    let query = str_arg(input, "query").trim();
    if query.is_empty() {
        return ToolResult::failed("No query provided");
    }
    match fetch_npm(NPM_SEARCH_URL, query).await {
        Ok(summary) => ToolResult::ok(summary),
        Err(err) => {
            debug!(error = %err, query, "npm search degraded");
            degraded(query)
        }
    }
}

/// Successful-looking result for a failed advisory search.
fn degraded(query: &str) -> ToolResult {
    ToolResult::ok(format!(
        "[Search] Live results unavailable (add a search credential). \
         Answer from general knowledge for: {query}"
    ))
}

async fn fetch_web(base: &str, query: &str) -> Result<String> {
    let body = get_json(
        shared_client()
            .get(base)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")]),
    )
    .await?;
    Ok(summarize_web(query, &body))
}

async fn fetch_github(base: &str, query: &str) -> Result<String> {
    let body = get_json(
        shared_client()
            .get(base)
            // GitHub rejects requests without a user agent.
            .header(USER_AGENT, "aether-engine")
            .query(&[("q", query), ("sort", "stars"), ("per_page", "5")]),
    )
    .await?;
    Ok(summarize_github(query, &body))
}

async fn fetch_npm(base: &str, query: &str) -> Result<String> {
    let body = get_json(
        shared_client()
            .get(base)
            .query(&[("text", query), ("size", "5")]),
    )
    .await?;
    Ok(summarize_npm(query, &body))
}

async fn get_json(request: reqwest::RequestBuilder) -> Result<Value> {
    let resp = tokio::time::timeout(SEARCH_TIMEOUT, request.send())
        .await
        .map_err(|_| AetherError::Timeout(SEARCH_TIMEOUT.as_millis() as u64))??;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(AetherError::api(status, "search endpoint returned an error"));
    }
    Ok(resp.json().await?)
}

fn summarize_web(query: &str, body: &Value) -> String {
    let mut lines = Vec::new();
    if let Some(abstract_text) = body.get("AbstractText").and_then(Value::as_str) {
        if !abstract_text.is_empty() {
            lines.push(abstract_text.to_string());
        }
    }
    if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
        for topic in topics.iter().take(MAX_RESULTS) {
            if let Some(text) = topic.get("Text").and_then(Value::as_str) {
                lines.push(format!("- {text}"));
            }
        }
    }
    if lines.is_empty() {
        return format!("[Search] No instant results for: {query}");
    }
    format!("Web results for \"{query}\":\n{}", lines.join("\n"))
}

fn summarize_github(query: &str, body: &Value) -> String {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if items.is_empty() {
        return format!("[Search] No GitHub repositories found for: {query}");
    }
    let mut lines = vec![format!("GitHub repositories for \"{query}\":")];
    for item in items.iter().take(MAX_RESULTS) {
        let name = item.get("full_name").and_then(Value::as_str).unwrap_or("?");
        let stars = item
            .get("stargazers_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let description = item
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        lines.push(format!("- {name} ({stars} stars): {description}"));
    }
    lines.join("\n")
}

fn summarize_npm(query: &str, body: &Value) -> String {
    let objects = body
        .get("objects")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if objects.is_empty() {
        return format!("[Search] No npm packages found for: {query}");
    }
    let mut lines = vec![format!("npm packages for \"{query}\":")];
    for object in objects.iter().take(MAX_RESULTS) {
        let package = object.get("package").cloned().unwrap_or(Value::Null);
        let name = package.get("name").and_then(Value::as_str).unwrap_or("?");
        let version = package.get("version").and_then(Value::as_str).unwrap_or("?");
        let description = package
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        lines.push(format!("- {name}@{version}: {description}"));
    }
    lines.join("\n")
}
