//! Dynamic Expander: on-demand discovery of files implicated by errors,
//! imports, or a user-mentioned path. Results are handed back as snippets
//! with provenance metadata for the context manager to store.

use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::fs;
use tracing::debug;

use crate::data_model::{CodeSnippet, Provenance};

const MAX_READ_BYTES: u64 = 200_000;
const LIKELY_ROOTS: &[&str] = &["src", "lib", "app", "config"];

#[derive(Debug, Clone)]
pub struct ExpandedSnippet {
    pub snippet: CodeSnippet,
    pub provenance: Provenance,
}

/// Parse file paths out of error text, e.g. Python `File "a.py", line 3`,
/// Rust `--> src/main.rs:10:5`, or a bare `some/path.rs` token.
fn parse_paths_from_error(error_text: &str) -> Vec<PathBuf> {
    static PATTERNS: once_cell::sync::Lazy<Vec<Regex>> = once_cell::sync::Lazy::new(|| {
        vec![
            Regex::new(r#"File "([^"]+)""#).unwrap(),
            Regex::new(r"-->\s+([^\s:]+):\d+").unwrap(),
            Regex::new(r"(?:^|\s)([\w./\\-]+\.(?:rs|py|ts|tsx|js|jsx|go|java|rb))(?::\d+)?").unwrap(),
        ]
    });

    let mut paths = Vec::new();
    for pattern in PATTERNS.iter() {
        for cap in pattern.captures_iter(error_text) {
            if let Some(m) = cap.get(1) {
                let candidate = PathBuf::from(m.as_str());
                if !paths.contains(&candidate) {
                    paths.push(candidate);
                }
            }
        }
    }
    paths
}

/// Crude import/require extraction, language-agnostic on purpose: good
/// enough to discover first-party modules one hop away, not a real parser.
fn parse_import_targets(content: &str) -> Vec<String> {
    static IMPORT_PATTERNS: once_cell::sync::Lazy<Vec<Regex>> = once_cell::sync::Lazy::new(|| {
        vec![
            Regex::new(r#"(?m)^use\s+crate::([\w:]+)"#).unwrap(),
            Regex::new(r#"(?m)^\s*(?:import|from)\s+([\w.]+)"#).unwrap(),
            Regex::new(r#"require\(['"]([^'"]+)['"]\)"#).unwrap(),
        ]
    });

    let mut targets = Vec::new();
    for pattern in IMPORT_PATTERNS.iter() {
        for cap in pattern.captures_iter(content) {
            if let Some(m) = cap.get(1) {
                targets.push(m.as_str().replace("::", "/"));
            }
        }
    }
    targets
}

async fn read_bounded(path: &Path) -> Option<String> {
    let meta = fs::metadata(path).await.ok()?;
    if meta.len() > MAX_READ_BYTES {
        debug!(path = %path.display(), size = meta.len(), "skipping oversized file in dynamic expansion");
        return None;
    }
    fs::read_to_string(path).await.ok()
}

fn snippet_from(path: &Path, content: String, triggered_by_turn: u64, reason: &str) -> ExpandedSnippet {
    let line_count = content.lines().count().max(1);
    ExpandedSnippet {
        snippet: CodeSnippet {
            path: path.to_path_buf(),
            start_line: 1,
            end_line: line_count,
            content,
            last_accessed_turn: triggered_by_turn,
            access_count: 1,
            relevance_score: 0.0,
        },
        provenance: Provenance {
            reason: reason.to_string(),
            triggered_by_turn,
        },
    }
}

/// Error-driven expansion: parse file paths out of `error_text` and read
/// those files relative to `workspace_root`.
pub async fn expand_from_error(workspace_root: &Path, error_text: &str, triggered_by_turn: u64) -> Vec<ExpandedSnippet> {
    let mut out = Vec::new();
    for rel_path in parse_paths_from_error(error_text) {
        let abs_path = workspace_root.join(&rel_path);
        if let Some(content) = read_bounded(&abs_path).await {
            out.push(snippet_from(&rel_path, content, triggered_by_turn, "error-driven"));
        }
    }
    out
}

/// Dependency expansion: read `seed_content`'s imports one hop deep,
/// resolving them against the workspace root's likely source roots.
pub async fn expand_from_dependencies(
    workspace_root: &Path,
    seed_content: &str,
    triggered_by_turn: u64,
) -> Vec<ExpandedSnippet> {
    let mut out = Vec::new();
    // Depth bounded to one hop: targets are resolved directly against the
    // likely source roots below, never recursed into for their own imports.
    for target in parse_import_targets(seed_content) {
        for root in LIKELY_ROOTS {
            for ext in [".rs", ".py", ".ts", ".js"] {
                let candidate = workspace_root.join(root).join(format!("{target}{ext}"));
                if let Some(content) = read_bounded(&candidate).await {
                    let rel = candidate.strip_prefix(workspace_root).unwrap_or(&candidate).to_path_buf();
                    out.push(snippet_from(&rel, content, triggered_by_turn, "dependency-driven"));
                }
            }
        }
    }
    out
}

/// Directory expansion: enumerate sibling files in likely source roots.
pub async fn expand_from_directory(workspace_root: &Path, triggered_by_turn: u64) -> Vec<ExpandedSnippet> {
    let mut out = Vec::new();
    for root in LIKELY_ROOTS {
        let dir = workspace_root.join(root);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_file() {
                if let Some(content) = read_bounded(&path).await {
                    let rel = path.strip_prefix(workspace_root).unwrap_or(&path).to_path_buf();
                    out.push(snippet_from(&rel, content, triggered_by_turn, "directory-driven"));
                }
            }
        }
    }
    out
}

/// Keyword fallback: content-grep for `symbol` across likely source roots.
pub async fn expand_from_keyword(workspace_root: &Path, symbol: &str, triggered_by_turn: u64) -> Vec<ExpandedSnippet> {
    let mut out = Vec::new();
    for root in LIKELY_ROOTS {
        let dir = workspace_root.join(root);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(content) = read_bounded(&path).await {
                if content.contains(symbol) {
                    let rel = path.strip_prefix(workspace_root).unwrap_or(&path).to_path_buf();
                    out.push(snippet_from(&rel, content, triggered_by_turn, "keyword-fallback"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_traceback_paths() {
        let err = "Traceback (most recent call last):\n  File \"app/main.py\", line 10, in run\nNameError: x";
        let paths = parse_paths_from_error(err);
        assert!(paths.contains(&PathBuf::from("app/main.py")));
    }

    #[test]
    fn parses_rust_compiler_error_paths() {
        let err = "error[E0425]: cannot find value `x`\n --> src/main.rs:4:5\n";
        let paths = parse_paths_from_error(err);
        assert!(paths.contains(&PathBuf::from("src/main.rs")));
    }

    #[tokio::test]
    async fn error_driven_expansion_reads_referenced_file() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("mod.rs"), "fn broken() {}\n").await.unwrap();
        let err = "error\n --> mod.rs:1:1\n";
        let found = expand_from_error(dir.path(), err, 3).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provenance.reason, "error-driven");
        assert_eq!(found[0].provenance.triggered_by_turn, 3);
    }
}
