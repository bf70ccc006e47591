//! Smart Prioritizer: weighted scoring of candidate context items.
//! Weights are calibrated, not load-bearing for correctness beyond the
//! invariant that all-zero signals score 0 and all-one signals score 1.

use std::path::Path;

use rustc_hash::FxHashSet;

use crate::data_model::{CodeSnippet, ToolResult};

const SNIPPET_WEIGHTS: ScoreWeights = ScoreWeights {
    content: 0.35,
    recency: 0.25,
    frequency: 0.15,
    error: 0.15,
    coherence: 0.10,
};

const TOOL_RESULT_WEIGHTS: ScoreWeights = ScoreWeights {
    content: 0.40,
    recency: 0.30,
    frequency: 0.0,
    error: 0.20,
    coherence: 0.10,
};

const RECENCY_WINDOW: u64 = 10;
const FREQUENCY_SATURATION: u32 = 10;

#[derive(Debug, Clone, Copy)]
struct ScoreWeights {
    content: f64,
    recency: f64,
    frequency: f64,
    error: f64,
    coherence: f64,
}

const ERROR_MARKERS: &[&str] = &["error", "exception", "traceback", "failed"];

const VALUABLE_PATH_MARKERS: &[&str] = &["config", "main.rs", "main.py", "index.ts", "mod.rs", "lib.rs"];
const GENERATED_PATH_MARKERS: &[&str] = &["target/", "node_modules/", "dist/", "build/", ".min.", "vendor/"];

fn tokenize(text: &str) -> FxHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn keyword_overlap(item_text: &str, query_tokens: &FxHashSet<String>) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let item_tokens = tokenize(item_text);
    if item_tokens.is_empty() {
        return 0.0;
    }
    let overlap = item_tokens.intersection(query_tokens).count();
    (overlap as f64 / query_tokens.len() as f64).min(1.0)
}

fn contains_error_marker(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    ERROR_MARKERS.iter().any(|m| lowered.contains(m))
        || text
            .split_whitespace()
            .any(|tok| tok.parse::<i32>().map(|n| n != 0).unwrap_or(false) && lowered.contains("exit"))
}

fn path_coherence_bonus(path: &str) -> f64 {
    let lowered = path.to_ascii_lowercase();
    if GENERATED_PATH_MARKERS.iter().any(|m| lowered.contains(m)) {
        return 0.0;
    }
    if VALUABLE_PATH_MARKERS.iter().any(|m| lowered.contains(m)) {
        return 1.0;
    }
    0.5
}

/// Scores a single item's five weighted factors, each already normalized
/// to `[0, 1]`, and reduces them to one final score via the weights.
fn weighted_score(weights: ScoreWeights, content: f64, recency: f64, frequency: f64, error: f64, coherence: f64) -> f64 {
    weights.content * content
        + weights.recency * recency
        + weights.frequency * frequency
        + weights.error * error
        + weights.coherence * coherence
}

/// A scored candidate, ready to be sorted. Ties are broken by recency
/// then lexicographic path order.
#[derive(Debug, Clone)]
pub struct ScoredSnippet<'a> {
    pub snippet: &'a CodeSnippet,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredToolResult<'a> {
    pub tool_result: &'a ToolResult,
    pub score: f64,
}

pub struct SmartPrioritizer {
    pub current_turn: u64,
}

impl SmartPrioritizer {
    pub fn new(current_turn: u64) -> Self {
        Self { current_turn }
    }

    pub fn score_snippet(&self, snippet: &CodeSnippet, query_text: &str) -> f64 {
        let query_tokens = tokenize(query_text);
        let content = keyword_overlap(&snippet.content, &query_tokens);
        let recency = recency_score(self.current_turn, snippet.last_accessed_turn);
        let frequency = (snippet.access_count as f64 / FREQUENCY_SATURATION as f64).min(1.0);
        let error = if contains_error_marker(&snippet.content) { 1.0 } else { 0.0 };
        let coherence = path_coherence_bonus(&snippet.path.to_string_lossy());
        weighted_score(SNIPPET_WEIGHTS, content, recency, frequency, error, coherence)
    }

    pub fn score_tool_result(&self, result: &ToolResult, query_text: &str) -> f64 {
        let query_tokens = tokenize(query_text);
        let text = result.prompt_text();
        let content = keyword_overlap(&text, &query_tokens);
        let recency = recency_score(self.current_turn, result.turn_number);
        let error = if result.is_error || contains_error_marker(&text) { 1.0 } else { 0.0 };
        let coherence = path_coherence_bonus(&result.tool_name);
        weighted_score(TOOL_RESULT_WEIGHTS, content, recency, 0.0, error, coherence)
    }

    /// Rank snippets highest-score first, ties broken by recency then path.
    pub fn rank_snippets<'a>(&self, snippets: &'a [CodeSnippet], query_text: &str) -> Vec<ScoredSnippet<'a>> {
        let mut scored: Vec<ScoredSnippet<'a>> = snippets
            .iter()
            .map(|s| ScoredSnippet {
                snippet: s,
                score: self.score_snippet(s, query_text),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.snippet.last_accessed_turn.cmp(&a.snippet.last_accessed_turn))
                .then_with(|| path_lexicographic(a.snippet, b.snippet))
        });
        scored
    }

    pub fn rank_tool_results<'a>(&self, results: &'a [ToolResult], query_text: &str) -> Vec<ScoredToolResult<'a>> {
        let mut scored: Vec<ScoredToolResult<'a>> = results
            .iter()
            .map(|r| ScoredToolResult {
                tool_result: r,
                score: self.score_tool_result(r, query_text),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.tool_result.turn_number.cmp(&a.tool_result.turn_number))
                .then_with(|| a.tool_result.tool_name.cmp(&b.tool_result.tool_name))
        });
        scored
    }
}

fn recency_score(current_turn: u64, last_accessed_turn: u64) -> f64 {
    let delta = current_turn.saturating_sub(last_accessed_turn);
    (1.0 - (delta as f64 / RECENCY_WINDOW as f64)).max(0.0)
}

fn path_lexicographic(a: &CodeSnippet, b: &CodeSnippet) -> std::cmp::Ordering {
    Path::new(&a.path).cmp(Path::new(&b.path))
}
