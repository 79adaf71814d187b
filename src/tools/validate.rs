//! Heuristic file validator behind the `run_command` tool.
//!
//! This is a structural checker, not an interpreter: it strips strings and
//! comments, balances brackets, balances markup tags, parses JSON, and checks
//! a couple of framework conventions. Findings only fail the call when they
//! are error-class and the command reads like a build or type-check; anything
//! else comes back as a successful report the model can weigh itself.

use serde_json::{Map, Value};
use strum::Display;

use super::context::{self, SharedContext};
use super::{str_arg, ToolResult};

/// Commands that are expected to gate on errors.
const BUILD_MARKERS: [&str; 6] = ["build", "tsc", "lint", "check", "compile", "vite"];

/// HTML elements that never take a closing tag.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
struct Finding {
    severity: Severity,
    path: String,
    message: String,
}

impl Finding {
    fn error(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn warning(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn info(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

pub(crate) fn run_command(ctx: &SharedContext, input: &Map<String, Value>) -> ToolResult {
    let command = str_arg(input, "command").trim();
    if command.is_empty() {
        return ToolResult::failed("No command provided");
    }

    let requested: Option<Vec<String>> = input.get("files").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    });

    let mut findings = Vec::new();
    let targets: Vec<(String, String)> = {
        let guard = context::lock(ctx);
        match &requested {
            Some(paths) => paths
                .iter()
                .filter_map(|path| match guard.files.get(path) {
                    Some(content) => Some((path.clone(), content.clone())),
                    None => {
                        findings.push(Finding::info(path, "not in the project, skipped"));
                        None
                    }
                })
                .collect(),
            None => guard
                .files
                .iter()
                .map(|(path, content)| (path.clone(), content.clone()))
                .collect(),
        }
    };

    if targets.is_empty() && findings.is_empty() {
        return ToolResult::ok(format!("`{command}`: no files in the project to check yet"));
    }

    for (path, content) in &targets {
        findings.extend(validate_file(path, content));
    }

    let report = render_report(command, targets.len(), &findings);
    let has_errors = findings.iter().any(|f| f.severity == Severity::Error);
    if has_errors && is_build_command(command) {
        ToolResult::failed(report)
    } else {
        ToolResult::ok(report)
    }
}

fn is_build_command(command: &str) -> bool {
    let lowered = command.to_lowercase();
    BUILD_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn render_report(command: &str, file_count: usize, findings: &[Finding]) -> String {
    if findings.is_empty() {
        return format!("`{command}`: checked {file_count} file(s), no issues found");
    }
    let errors = findings.iter().filter(|f| f.severity == Severity::Error).count();
    let mut lines = vec![format!(
        "`{command}`: checked {file_count} file(s), {} finding(s), {errors} error(s)",
        findings.len()
    )];
    for finding in findings {
        lines.push(format!(
            "{} {}: {}",
            finding.severity, finding.path, finding.message
        ));
    }
    lines.join("\n")
}

fn validate_file(path: &str, content: &str) -> Vec<Finding> {
    let ext = extension(path);
    let mut findings = Vec::new();
    match ext {
        "js" | "jsx" | "ts" | "tsx" | "css" | "py" => {
            let stripped = strip_strings_and_comments(content, ext);
            findings.extend(check_brackets(path, &stripped));
            if matches!(ext, "jsx" | "tsx") && !content.contains("export default") {
                findings.push(Finding::error(
                    path,
                    "missing `export default`; component files must export a default component",
                ));
            }
            if stripped.contains("debugger") {
                findings.push(Finding::warning(path, "leftover `debugger` statement"));
            }
        }
        "json" => {
            if let Err(err) = serde_json::from_str::<Value>(content) {
                findings.push(Finding::error(path, format!("invalid JSON: {err}")));
            }
        }
        "html" | "svg" | "xml" => {
            findings.extend(check_tags(path, content));
            if ext == "html" && !content.to_lowercase().contains("<!doctype") {
                findings.push(Finding::warning(path, "missing `<!DOCTYPE html>` declaration"));
            }
        }
        // Prose and unknown extensions carry no structural rules.
        _ => {}
    }
    findings
}

fn extension(path: &str) -> &str {
    path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// Blank out string literals and comments, preserving newlines so findings
/// can report line numbers against the original text.
fn strip_strings_and_comments(src: &str, ext: &str) -> String {
    let js_like = matches!(ext, "js" | "jsx" | "ts" | "tsx");
    let block_comments = js_like || ext == "css";
    let hash_comments = ext == "py";

    enum State {
        Code,
        LineComment,
        BlockComment,
        Str(char),
        TripleStr(char),
    }

    fn blank(c: char, out: &mut String) {
        out.push(if c == '\n' { '\n' } else { ' ' });
    }

    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Code => {
                if js_like && c == '/' && chars.get(i + 1) == Some(&'/') {
                    state = State::LineComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if block_comments && c == '/' && chars.get(i + 1) == Some(&'*') {
                    state = State::BlockComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if hash_comments && c == '#' {
                    state = State::LineComment;
                    out.push(' ');
                    i += 1;
                    continue;
                }
                if hash_comments
                    && (c == '"' || c == '\'')
                    && chars.get(i + 1) == Some(&c)
                    && chars.get(i + 2) == Some(&c)
                {
                    state = State::TripleStr(c);
                    out.push_str("   ");
                    i += 3;
                    continue;
                }
                if c == '"' || c == '\'' || (js_like && c == '`') {
                    state = State::Str(c);
                    out.push(' ');
                    i += 1;
                    continue;
                }
                out.push(c);
                i += 1;
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
                blank(c, &mut out);
                i += 1;
            }
            State::BlockComment => {
                if c == '*' && chars.get(i + 1) == Some(&'/') {
                    state = State::Code;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                blank(c, &mut out);
                i += 1;
            }
            State::Str(quote) => {
                if c == '\\' {
                    blank(c, &mut out);
                    if let Some(&next) = chars.get(i + 1) {
                        blank(next, &mut out);
                        i += 2;
                        continue;
                    }
                } else if c == quote {
                    state = State::Code;
                } else if c == '\n' && quote != '`' {
                    // Unterminated single-line string: fall back to code at
                    // the newline instead of swallowing the rest of the file.
                    state = State::Code;
                }
                blank(c, &mut out);
                i += 1;
            }
            State::TripleStr(quote) => {
                if c == quote
                    && chars.get(i + 1) == Some(&quote)
                    && chars.get(i + 2) == Some(&quote)
                {
                    state = State::Code;
                    out.push_str("   ");
                    i += 3;
                    continue;
                }
                blank(c, &mut out);
                i += 1;
            }
        }
    }
    out
}

fn check_brackets(path: &str, stripped: &str) -> Vec<Finding> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    for c in stripped.chars() {
        match c {
            '\n' => line += 1,
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        // Stop at the first mismatch; everything after it is
                        // cascade noise.
                        return vec![Finding::error(
                            path,
                            format!(
                                "mismatched `{c}` on line {line}; `{open}` from line {open_line} is still open"
                            ),
                        )];
                    }
                    None => {
                        return vec![Finding::error(
                            path,
                            format!("unexpected `{c}` on line {line}"),
                        )];
                    }
                }
            }
            _ => {}
        }
    }
    stack
        .into_iter()
        .map(|(open, open_line)| {
            Finding::error(path, format!("unclosed `{open}` opened on line {open_line}"))
        })
        .collect()
}

fn check_tags(path: &str, content: &str) -> Vec<Finding> {
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(String, usize)> = Vec::new();
    let mut findings = Vec::new();
    let mut line = 1usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c != '<' {
            i += 1;
            continue;
        }

        // Comments, doctype, and processing instructions carry no pairing.
        if starts_with_at(&chars, i + 1, "!--") {
            i = skip_until(&chars, i + 4, "-->", &mut line);
            continue;
        }
        if chars.get(i + 1) == Some(&'!') || chars.get(i + 1) == Some(&'?') {
            i = skip_until(&chars, i + 1, ">", &mut line);
            continue;
        }

        let closing = chars.get(i + 1) == Some(&'/');
        let name_start = if closing { i + 2 } else { i + 1 };
        let name = read_tag_name(&chars, name_start);
        if name.is_empty() {
            // Bare `<` in text, common in inline scripts; not a tag.
            i += 1;
            continue;
        }

        let (end, self_closed) = scan_tag_end(&chars, name_start + name.len(), &mut line);
        if closing {
            match stack.pop() {
                Some((open, _)) if open == name => {}
                Some((open, open_line)) => {
                    findings.push(Finding::error(
                        path,
                        format!(
                            "`</{name}>` on line {line} closes `<{open}>` opened on line {open_line}"
                        ),
                    ));
                    return findings;
                }
                None => {
                    findings.push(Finding::error(
                        path,
                        format!("`</{name}>` on line {line} has no opening tag"),
                    ));
                    return findings;
                }
            }
        } else if !self_closed && !VOID_ELEMENTS.contains(&name.as_str()) {
            // Script and style bodies may contain `<`; jump straight to the
            // close tag so their content is never parsed as markup.
            if name == "script" || name == "style" {
                stack.push((name.clone(), line));
                i = skip_until(&chars, end, &format!("</{name}"), &mut line);
                i = skip_until(&chars, i, ">", &mut line);
                stack.pop();
                continue;
            }
            stack.push((name, line));
        }
        i = end;
    }

    findings.extend(stack.into_iter().map(|(name, open_line)| {
        Finding::error(path, format!("unclosed `<{name}>` opened on line {open_line}"))
    }));
    findings
}

fn starts_with_at(chars: &[char], start: usize, needle: &str) -> bool {
    needle
        .chars()
        .enumerate()
        .all(|(offset, c)| chars.get(start + offset) == Some(&c))
}

/// Advance past the first occurrence of `needle`, counting newlines.
fn skip_until(chars: &[char], start: usize, needle: &str, line: &mut usize) -> usize {
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '\n' {
            *line += 1;
        }
        if starts_with_at(chars, i, needle) {
            return i + needle.chars().count();
        }
        i += 1;
    }
    i
}

fn read_tag_name(chars: &[char], start: usize) -> String {
    let mut name = String::new();
    let mut i = start;
    while let Some(&c) = chars.get(i) {
        if c.is_ascii_alphanumeric() || c == '-' {
            name.push(c.to_ascii_lowercase());
            i += 1;
        } else {
            break;
        }
    }
    name
}

/// Find the end of an open tag, honoring quoted attribute values. Returns the
/// index after `>` and whether the tag self-closed.
fn scan_tag_end(chars: &[char], start: usize, line: &mut usize) -> (usize, bool) {
    let mut i = start;
    let mut quote: Option<char> = None;
    let mut self_closed = false;
    while let Some(&c) = chars.get(i) {
        if c == '\n' {
            *line += 1;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '/' if chars.get(i + 1) == Some(&'>') => self_closed = true,
                '>' => return (i + 1, self_closed),
                _ => {}
            },
        }
        i += 1;
    }
    (i, self_closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContext;

    fn ctx_with(files: &[(&str, &str)]) -> SharedContext {
        let mut context = ToolContext::new();
        for (path, content) in files {
            context.files.insert((*path).into(), (*content).into());
        }
        context.shared()
    }

    fn command_args(command: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("command".into(), Value::String(command.into()));
        map
    }

    // ── bracket balance ──

    #[test]
    fn balanced_js_passes_and_unbalanced_fails_build() {
        let good = ctx_with(&[("app.js", "function f() { return [1, 2]; }\n")]);
        let ok = run_command(&good, &command_args("npm run build"));
        assert!(ok.success);
        assert!(ok.result.contains("no issues found"));

        let bad = ctx_with(&[("app.js", "function f() { return [1, 2];\n")]);
        let failed = run_command(&bad, &command_args("npm run build"));
        assert!(!failed.success);
        assert!(failed.result.contains("unclosed `{`"));
    }

    #[test]
    fn brackets_inside_strings_and_comments_are_ignored() {
        let ctx = ctx_with(&[(
            "app.js",
            "// } stray in comment\nconst s = \"({[\";\nconst t = `{{{`;\nlet ok = (1);\n",
        )]);
        let result = run_command(&ctx, &command_args("tsc"));
        assert!(result.success, "got: {}", result.result);
    }

    #[test]
    fn python_hash_comments_and_triple_quotes_are_stripped() {
        let ctx = ctx_with(&[(
            "tool.py",
            "def f():\n    \"\"\"docstring with ( and { inside\"\"\"\n    # also ) here\n    return [1]\n",
        )]);
        let result = run_command(&ctx, &command_args("check"));
        assert!(result.success, "got: {}", result.result);
    }

    // ── markup ──

    #[test]
    fn unclosed_div_is_an_error_and_missing_doctype_a_warning() {
        let ctx = ctx_with(&[(
            "index.html",
            "<html><body><div><p>hi</p></body></html>",
        )]);
        let result = run_command(&ctx, &command_args("npm run build"));
        assert!(!result.success);
        assert!(result.result.contains("closes `<div>`"));

        let warn_only = ctx_with(&[("index.html", "<html><body><br><img src=\"x.png\"></body></html>")]);
        let result = run_command(&warn_only, &command_args("npm run build"));
        assert!(result.success, "warnings alone never fail: {}", result.result);
        assert!(result.result.contains("missing `<!DOCTYPE html>`"));
    }

    #[test]
    fn script_bodies_do_not_confuse_the_tag_scanner() {
        let ctx = ctx_with(&[(
            "index.html",
            "<!DOCTYPE html><html><head><script>if (1 < 2) { x(); }</script></head><body></body></html>",
        )]);
        let result = run_command(&ctx, &command_args("build"));
        assert!(result.success, "got: {}", result.result);
        assert!(result.result.contains("no issues found"));
    }

    // ── json and framework conventions ──

    #[test]
    fn invalid_json_fails_a_check_command() {
        let ctx = ctx_with(&[("package.json", "{ \"name\": }")]);
        let result = run_command(&ctx, &command_args("npm run lint"));
        assert!(!result.success);
        assert!(result.result.contains("invalid JSON"));
    }

    #[test]
    fn jsx_without_default_export_is_an_error() {
        let ctx = ctx_with(&[("App.jsx", "function App() { return null; }\n")]);
        let result = run_command(&ctx, &command_args("vite build"));
        assert!(!result.success);
        assert!(result.result.contains("export default"));
    }

    // ── command classification ──

    #[test]
    fn non_build_commands_report_errors_without_failing() {
        let ctx = ctx_with(&[("app.js", "function f() {\n")]);
        let result = run_command(&ctx, &command_args("explain the bug"));
        assert!(result.success);
        assert!(result.result.contains("unclosed `{`"));
    }

    #[test]
    fn named_files_limit_the_scan() {
        let ctx = ctx_with(&[("bad.js", "({"), ("good.js", "let a = 1;")]);
        let mut input = command_args("npm run build");
        input.insert("files".into(), serde_json::json!(["good.js", "ghost.js"]));
        let result = run_command(&ctx, &input);
        assert!(result.success, "bad.js was out of scope: {}", result.result);
        assert!(result.result.contains("ghost.js"));
        assert!(result.result.contains("skipped"));
    }

    #[test]
    fn empty_project_reports_nothing_to_check() {
        let ctx = ctx_with(&[]);
        let result = run_command(&ctx, &command_args("npm run build"));
        assert!(result.success);
        assert!(result.result.contains("no files in the project"));
    }

    #[test]
    fn missing_command_fails() {
        let ctx = ctx_with(&[]);
        let result = run_command(&ctx, &Map::new());
        assert!(!result.success);
        assert_eq!(result.result, "No command provided");
    }
}
