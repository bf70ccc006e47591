//! Proactive Gatherer: a one-time-per-session workspace scan producing
//! project descriptors, VCS history, and docs. Never executes user code;
//! results are cached for the session.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

const PROJECT_DESCRIPTOR_NAMES: &[&str] = &[
    "README.md", "README", "README.rst", "package.json", "Cargo.toml", "pyproject.toml", "go.mod",
    "Dockerfile", ".github/workflows", "CMakeLists.txt",
];
const DOC_EXTENSIONS: &[&str] = &[".md", ".rst", ".txt"];
const MAX_DOC_FILES: usize = 20;
const MAX_DOC_BYTES: u64 = 300_000;
const COMMIT_HISTORY_LIMIT: usize = 10;
const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

const IGNORED_DIR_NAMES: &[&str] = &["target", "node_modules", ".git", "dist", "build", "vendor", ".venv"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub subject: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatheredContext {
    pub project_descriptors: Vec<PathBuf>,
    pub commit_history: Vec<CommitSummary>,
    pub doc_files: Vec<PathBuf>,
}

impl GatheredContext {
    pub fn is_empty(&self) -> bool {
        self.project_descriptors.is_empty() && self.commit_history.is_empty() && self.doc_files.is_empty()
    }

    /// Render as compact prompt text, in priority order: descriptors, then
    /// commit history, then docs. Caller truncates to fit budget.
    pub fn as_prompt_sections(&self) -> Vec<String> {
        let mut sections = Vec::new();
        if !self.project_descriptors.is_empty() {
            let list = self
                .project_descriptors
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!("Project descriptors present: {list}"));
        }
        if !self.commit_history.is_empty() {
            let lines = self
                .commit_history
                .iter()
                .map(|c| format!("{} {} {} {}", c.hash, c.date, c.author, c.subject))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("Recent commits:\n{lines}"));
        }
        if !self.doc_files.is_empty() {
            let list = self
                .doc_files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!("Documentation files: {list}"));
        }
        sections
    }
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| IGNORED_DIR_NAMES.contains(&s))
            .unwrap_or(false)
    })
}

fn scan_project_descriptors(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for name in PROJECT_DESCRIPTOR_NAMES {
        let candidate = root.join(name);
        if candidate.exists() {
            found.push(PathBuf::from(*name));
        }
    }
    found
}

fn scan_docs(root: &Path) -> Vec<PathBuf> {
    let mut docs = Vec::new();
    let docs_dir = root.join("docs");
    let mut roots = vec![root.to_path_buf()];
    if docs_dir.is_dir() {
        roots.push(docs_dir);
    }

    for scan_root in roots {
        let entries = match std::fs::read_dir(&scan_root) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_ignored(&path) || !path.is_file() {
                continue;
            }
            let name = path.to_string_lossy();
            if DOC_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
                let size_ok = entry.metadata().map(|m| m.len() <= MAX_DOC_BYTES).unwrap_or(false);
                if size_ok {
                    docs.push(path.strip_prefix(root).unwrap_or(&path).to_path_buf());
                }
            }
            if docs.len() >= MAX_DOC_FILES {
                return docs;
            }
        }
    }
    docs
}

/// Read-only `git log` scrape for the last `limit` commit subjects,
/// authors, and dates. Returns an empty vector (not an error) outside a
/// git repository or when `git` is unavailable.
fn collect_commit_history(root: &Path, limit: usize) -> Vec<CommitSummary> {
    let output = Command::new("git")
        .args([
            "log",
            &format!("-n{limit}"),
            "--pretty=format:%h%x1f%an%x1f%ad%x1f%s",
            "--date=short",
        ])
        .current_dir(root)
        .output();

    let output = match output {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\u{1f}');
            Some(CommitSummary {
                hash: parts.next()?.to_string(),
                author: parts.next()?.to_string(),
                date: parts.next()?.to_string(),
                subject: parts.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Scans the workspace rooted at `workspace_root`. Intended to run once
/// per session; the caller (context manager) is responsible for caching
/// the result. A 10s timeout bounds the scan; on timeout the cache is
/// left empty and the turn proceeds without proactive context.
pub async fn gather(workspace_root: &Path) -> GatheredContext {
    let root = workspace_root.to_path_buf();
    let scan = tokio::task::spawn_blocking(move || {
        let descriptors = scan_project_descriptors(&root);
        let docs = scan_docs(&root);
        let commits = collect_commit_history(&root, COMMIT_HISTORY_LIMIT);
        GatheredContext {
            project_descriptors: descriptors,
            commit_history: commits,
            doc_files: docs,
        }
    });

    match timeout(GATHER_TIMEOUT, scan).await {
        Ok(Ok(context)) => {
            debug!(
                descriptors = context.project_descriptors.len(),
                commits = context.commit_history.len(),
                docs = context.doc_files.len(),
                "proactive gather complete"
            );
            context
        }
        Ok(Err(join_err)) => {
            warn!(error = %join_err, "proactive gather task panicked");
            GatheredContext::default()
        }
        Err(_) => {
            warn!("proactive gather timed out; proceeding without proactive context");
            GatheredContext::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn gathers_readme_and_docs_without_executing_anything() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# Hello").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join("guide.md"), "guide").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target").join("should_be_ignored.md"), "nope").unwrap();

        let gathered = gather(dir.path()).await;
        assert!(gathered.project_descriptors.contains(&PathBuf::from("README.md")));
        assert!(gathered.doc_files.iter().any(|p| p.to_string_lossy().contains("guide.md")));
        assert!(!gathered
            .doc_files
            .iter()
            .any(|p| p.to_string_lossy().contains("should_be_ignored")));
    }

    #[tokio::test]
    async fn non_git_directory_yields_empty_commit_history() {
        let dir = TempDir::new().unwrap();
        let gathered = gather(dir.path()).await;
        assert!(gathered.commit_history.is_empty());
    }
}
