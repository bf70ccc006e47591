//! Content-type detection heuristics: first-line pragma, extension hints,
//! content shape.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Code,
    Documentation,
    ToolOutput,
    ErrorMessage,
    LogOutput,
    Configuration,
    Conversation,
    Generic,
}

const CODE_EXTENSIONS: &[&str] = &[
    ".rs", ".py", ".ts", ".tsx", ".js", ".jsx", ".go", ".java", ".c", ".cpp", ".h", ".rb", ".kt", ".swift",
];
const CONFIG_EXTENSIONS: &[&str] = &[".json", ".yaml", ".yml", ".toml", ".ini", ".cfg"];
const DOC_EXTENSIONS: &[&str] = &[".md", ".rst", ".txt"];

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    extensions.iter().any(|ext| path.ends_with(ext))
}

fn looks_like_error(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("traceback (most recent call last)")
        || lowered.contains("exception")
        || (lowered.contains("error") && lowered.contains("at "))
        || lowered.starts_with("error:")
}

fn looks_like_log(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().take(20).collect();
    if lines.is_empty() {
        return false;
    }
    let severity_lines = lines
        .iter()
        .filter(|l| {
            let upper = l.to_ascii_uppercase();
            upper.contains("INFO") || upper.contains("WARN") || upper.contains("ERROR") || upper.contains("DEBUG")
        })
        .count();
    severity_lines * 3 >= lines.len()
}

fn looks_like_code(text: &str) -> bool {
    let code_markers = ["fn ", "def ", "class ", "impl ", "import ", "function ", "const ", "let ", "{", "};"];
    let matches = code_markers.iter().filter(|m| text.contains(*m)).count();
    matches >= 2
}

fn looks_like_configuration(text: &str) -> bool {
    let trimmed = text.trim_start();
    (trimmed.starts_with('{') && trimmed.contains(':'))
        || trimmed.lines().take(5).any(|l| l.contains(": ") && !l.trim_start().starts_with('#'))
        || trimmed.lines().filter(|l| l.contains('=') && !l.contains("==")).count() > 2
}

fn looks_like_conversation(text: &str) -> bool {
    let markers = ["User:", "Assistant:", "Human:", "AI:"];
    markers.iter().any(|m| text.contains(m))
}

/// Detect the content type of `text`, optionally aided by a file path hint
/// (extension) and any first-line pragma (`#!/usr/bin/env`, `<?xml`, etc.).
pub fn detect_content_type(text: &str, hint_path: Option<&str>) -> ContentType {
    if let Some(path) = hint_path {
        if has_extension(path, CODE_EXTENSIONS) {
            return ContentType::Code;
        }
        if has_extension(path, CONFIG_EXTENSIONS) {
            return ContentType::Configuration;
        }
        if has_extension(path, DOC_EXTENSIONS) {
            return ContentType::Documentation;
        }
    }

    let first_line = text.lines().next().unwrap_or("");
    if first_line.starts_with("#!") {
        return ContentType::Code;
    }

    if looks_like_error(text) {
        return ContentType::ErrorMessage;
    }
    if looks_like_log(text) {
        return ContentType::LogOutput;
    }
    if looks_like_configuration(text) {
        return ContentType::Configuration;
    }
    if looks_like_code(text) {
        return ContentType::Code;
    }
    if looks_like_conversation(text) {
        return ContentType::Conversation;
    }
    // Tool output is distinguished from log output mostly by structure the
    // caller already knows (it came from a tool result); as a text-only
    // heuristic we treat multi-line, non-prose blobs without severity
    // markers as generic tool output rather than guessing documentation.
    if text.lines().count() > 3 && !text.contains(". ") {
        return ContentType::ToolOutput;
    }

    ContentType::Generic
}
