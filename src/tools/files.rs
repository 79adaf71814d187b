//! Handlers for the virtual file table.

use serde_json::{Map, Value};

use super::context::{self, SharedContext, ToolContext};
use super::{str_arg, ToolResult};

pub(crate) fn create_file(ctx: &SharedContext, input: &Map<String, Value>) -> ToolResult {
    let path = str_arg(input, "path").trim();
    let content = str_arg(input, "content");
    // Content is checked first: a truncated argument buffer parses to an
    // empty map, and "no content" is the message the model can act on.
    if content.is_empty() {
        let shown = if path.is_empty() { "new file" } else { path };
        return ToolResult::failed(format!("No content provided for {shown}"));
    }
    if path.is_empty() {
        return ToolResult::failed("No file path provided");
    }

    let replaced = context::lock(ctx)
        .files
        .insert(path.to_string(), content.to_string())
        .is_some();
    let verb = if replaced { "Updated" } else { "Created" };
    ToolResult::ok(format!("{verb} {path} ({} bytes)", content.len()))
}

pub(crate) fn edit_file(ctx: &SharedContext, input: &Map<String, Value>) -> ToolResult {
    let path = str_arg(input, "path").trim();
    let old_str = str_arg(input, "old_str");
    let new_str = str_arg(input, "new_str");
    if path.is_empty() {
        return ToolResult::failed("No file path provided");
    }
    if old_str.is_empty() {
        return ToolResult::failed(format!("No old_str provided for {path}"));
    }

    let mut guard = context::lock(ctx);
    let (occurrences, updated) = match guard.files.get(path) {
        Some(content) => (
            content.matches(old_str).count(),
            content.replacen(old_str, new_str, 1),
        ),
        None => {
            return ToolResult::failed(format!(
                "File {path} not found. Known files: {}",
                known_files(&guard)
            ));
        }
    };

    match occurrences {
        0 => ToolResult::failed(format!("old_str not found in {path}")),
        1 => {
            guard.files.insert(path.to_string(), updated);
            ToolResult::ok(format!("Edited {path}"))
        }
        n => ToolResult::failed(format!(
            "old_str appears {n} times in {path}; include more surrounding context so it matches exactly once"
        )),
    }
}

pub(crate) fn view_file(ctx: &SharedContext, input: &Map<String, Value>) -> ToolResult {
    let path = str_arg(input, "path").trim();
    if path.is_empty() {
        return ToolResult::failed("No file path provided");
    }

    let guard = context::lock(ctx);
    match guard.files.get(path) {
        Some(content) => ToolResult::ok(content.clone()),
        None => ToolResult::failed(format!(
            "File {path} not found. Known files: {}",
            known_files(&guard)
        )),
    }
}

fn known_files(ctx: &ToolContext) -> String {
    if ctx.files.is_empty() {
        return "none yet".to_string();
    }
    ctx.files.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(files: &[(&str, &str)]) -> SharedContext {
        let mut context = ToolContext::new();
        for (path, content) in files {
            context.files.insert((*path).into(), (*content).into());
        }
        context.shared()
    }

    fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    // ── create_file ──

    #[test]
    fn create_writes_and_overwrite_reports_update() {
        let ctx = ctx_with(&[]);
        let first = create_file(&ctx, &args(&[("path", "a.html"), ("content", "<html></html>")]));
        assert!(first.success);
        assert!(first.result.starts_with("Created a.html"));

        let second = create_file(&ctx, &args(&[("path", "a.html"), ("content", "<html>2</html>")]));
        assert!(second.success);
        assert!(second.result.starts_with("Updated a.html"));
        assert_eq!(context::lock(&ctx).files["a.html"], "<html>2</html>");
    }

    #[test]
    fn create_without_content_fails_with_no_content_message() {
        let ctx = ctx_with(&[]);
        let missing = create_file(&ctx, &args(&[("path", "a.html")]));
        assert!(!missing.success);
        assert_eq!(missing.result, "No content provided for a.html");

        // Empty input map, the truncated-arguments case.
        let empty = create_file(&ctx, &Map::new());
        assert!(!empty.success);
        assert!(empty.result.starts_with("No content provided"));
        assert!(context::lock(&ctx).files.is_empty());
    }

    // ── edit_file ──

    #[test]
    fn edit_distinguishes_zero_one_and_many_occurrences() {
        let ctx = ctx_with(&[("app.js", "let x = 1;\nlet y = 1;\n")]);

        let zero = edit_file(
            &ctx,
            &args(&[("path", "app.js"), ("old_str", "let z"), ("new_str", "let w")]),
        );
        assert!(!zero.success);
        assert_eq!(zero.result, "old_str not found in app.js");

        let many = edit_file(
            &ctx,
            &args(&[("path", "app.js"), ("old_str", "= 1;"), ("new_str", "= 2;")]),
        );
        assert!(!many.success);
        assert!(many.result.contains("appears 2 times"));

        let one = edit_file(
            &ctx,
            &args(&[("path", "app.js"), ("old_str", "let x = 1;"), ("new_str", "let x = 2;")]),
        );
        assert!(one.success);
        assert_eq!(
            context::lock(&ctx).files["app.js"],
            "let x = 2;\nlet y = 1;\n"
        );
    }

    #[test]
    fn edit_missing_file_lists_known_paths() {
        let ctx = ctx_with(&[("index.html", "<html></html>")]);
        let result = edit_file(
            &ctx,
            &args(&[("path", "style.css"), ("old_str", "body"), ("new_str", "html")]),
        );
        assert!(!result.success);
        assert_eq!(
            result.result,
            "File style.css not found. Known files: index.html"
        );
    }

    #[test]
    fn edit_allows_empty_new_str_as_deletion() {
        let ctx = ctx_with(&[("a.txt", "keep DROP keep")]);
        let result = edit_file(&ctx, &args(&[("path", "a.txt"), ("old_str", "DROP ")]));
        assert!(result.success);
        assert_eq!(context::lock(&ctx).files["a.txt"], "keep keep");
    }

    // ── view_file ──

    #[test]
    fn view_returns_content_or_known_paths() {
        let ctx = ctx_with(&[("a.txt", "hello")]);
        let hit = view_file(&ctx, &args(&[("path", "a.txt")]));
        assert!(hit.success);
        assert_eq!(hit.result, "hello");

        let miss = view_file(&ctx, &args(&[("path", "b.txt")]));
        assert!(!miss.success);
        assert_eq!(miss.result, "File b.txt not found. Known files: a.txt");
    }

    #[test]
    fn view_on_empty_project_says_none_yet() {
        let ctx = ctx_with(&[]);
        let miss = view_file(&ctx, &args(&[("path", "a.txt")]));
        assert_eq!(miss.result, "File a.txt not found. Known files: none yet");
    }
}
