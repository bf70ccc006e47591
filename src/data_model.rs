//! Core data model: `ConversationTurn`, `CodeSnippet`, `ToolResult`,
//! `ConversationState`, `PromptPayload`.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One of the enumerated states of a `ConversationTurn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnPhase {
    Init,
    ProcessingUserInput,
    AssemblingContext,
    CallingLlm,
    GeneratingResponse,
    CallingTools,
    ProcessingToolResults,
    Completed,
    Failed,
}

impl TurnPhase {
    /// Legal outgoing edges for this phase. Every phase may additionally
    /// move to `Failed` on error, which is handled separately by
    /// `advance`/`fail_turn` rather than listed here.
    pub fn legal_next(self) -> &'static [TurnPhase] {
        use TurnPhase::*;
        match self {
            Init => &[ProcessingUserInput],
            ProcessingUserInput => &[AssemblingContext],
            AssemblingContext => &[CallingLlm],
            CallingLlm => &[GeneratingResponse, CallingTools],
            CallingTools => &[ProcessingToolResults],
            ProcessingToolResults => &[AssemblingContext],
            GeneratingResponse => &[Completed],
            Completed => &[],
            Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnPhase::Completed | TurnPhase::Failed)
    }
}

fn now_unix_millis() -> u128 {
    chrono::Utc::now().timestamp_millis().max(0) as u128
}

/// Structured error info attached to a failed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// A single tool invocation request recorded against a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub sequence_index: usize,
    pub name: String,
    pub args: serde_json::Value,
}

/// Record of one tool invocation's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub args: serde_json::Value,
    pub raw_response: serde_json::Value,
    pub summary: Option<String>,
    pub is_error: bool,
    pub turn_number: u64,
    pub sequence_index: usize,
}

impl ToolResult {
    /// The text the context manager should consider including: the
    /// summary if present, else the raw response rendered as text. Raw is
    /// retained whenever a summary is absent.
    pub fn prompt_text(&self) -> String {
        match &self.summary {
            Some(summary) => summary.clone(),
            None => self.raw_response.to_string(),
        }
    }
}

/// A retrievable chunk of source. Identity is `(path, range)`, never a
/// pointer, snippets are looked up and updated by that key in the owning
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub last_accessed_turn: u64,
    pub access_count: u32,
    /// Transient, recomputed per assembly by the prioritizer; not persisted
    /// meaningfully across turns beyond the last computed value.
    #[serde(skip)]
    pub relevance_score: f32,
}

impl CodeSnippet {
    pub fn key(&self) -> (PathBuf, usize, usize) {
        (self.path.clone(), self.start_line, self.end_line)
    }

    pub fn touch(&mut self, turn_number: u64) {
        self.last_accessed_turn = turn_number;
        self.access_count = self.access_count.saturating_add(1);
    }
}

/// One user-assistant exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub number: u64,
    pub phase: TurnPhase,
    pub user_message: String,
    pub agent_message: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResult>,
    pub system_messages: Vec<String>,
    pub created_at_millis: u128,
    pub completed_at_millis: Option<u128>,
    pub error_info: Option<ErrorInfo>,
}

impl ConversationTurn {
    pub fn new(number: u64, user_message: String) -> Self {
        Self {
            number,
            phase: TurnPhase::Init,
            user_message,
            agent_message: String::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            system_messages: Vec::new(),
            created_at_millis: now_unix_millis(),
            completed_at_millis: None,
            error_info: None,
        }
    }

    /// Tool-result ordering matches tool-call ordering.
    pub fn tool_order_is_valid(&self) -> bool {
        self.tool_results
            .iter()
            .map(|r| r.sequence_index)
            .eq(self.tool_calls.iter().map(|c| c.sequence_index))
    }
}

/// Provenance attached to a snippet pulled in via the dynamic expander,
/// kept for logging even if the snippet itself is later evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub reason: String,
    pub triggered_by_turn: u64,
}

/// A message role in the assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Generation parameters that accompany a prompt (model, thinking, temp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub thinking_budget: u32,
    pub temperature: f32,
}

/// A declared tool schema, opaque to the context manager beyond its name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// The assembled per-call input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub system_instruction: String,
    pub messages: Vec<Message>,
    pub tool_schemas: Vec<ToolSchema>,
    pub generation_config: GenerationConfig,
    pub estimated_token_count: usize,
}

/// Why an assembly candidate was or was not included, for the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InclusionStatus {
    Included,
    Skipped,
    Excluded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyDecision {
    pub candidate: String,
    pub status: InclusionStatus,
    pub reason: String,
}

/// Process-local, single-user session state. Mutated only through the
/// state manager's operations.
#[derive(Debug)]
pub struct ConversationState {
    pub completed_turns: Vec<ConversationTurn>,
    pub current_turn: Option<ConversationTurn>,
    /// Bounded ring of known snippets; oldest evicted first once
    /// `snippet_capacity` is reached. Kept as a `Vec` (rather than
    /// `VecDeque`, unlike `tool_result_ring`) so the prioritizer can keep
    /// ranking it as a plain slice.
    pub snippets: Vec<CodeSnippet>,
    pub snippet_capacity: usize,
    /// Bounded ring of recent tool results; oldest evicted first.
    pub tool_result_ring: VecDeque<ToolResult>,
    pub tool_result_ring_capacity: usize,
    pub key_decisions: Vec<String>,
    pub file_modifications: Vec<PathBuf>,
    pub app_state: serde_json::Map<String, serde_json::Value>,
    pub proactive_cache: Option<crate::proactive::GatheredContext>,
}

/// Default bound on the snippet store when a caller doesn't size it
/// explicitly (`ConversationState::new`); large enough that ordinary
/// sessions never evict, small enough to bound memory.
const DEFAULT_SNIPPET_CAPACITY: usize = 500;

impl ConversationState {
    pub fn new(tool_result_ring_capacity: usize) -> Self {
        Self::with_snippet_capacity(tool_result_ring_capacity, DEFAULT_SNIPPET_CAPACITY)
    }

    pub fn with_snippet_capacity(tool_result_ring_capacity: usize, snippet_capacity: usize) -> Self {
        Self {
            completed_turns: Vec::new(),
            current_turn: None,
            snippets: Vec::new(),
            snippet_capacity,
            tool_result_ring: VecDeque::new(),
            tool_result_ring_capacity,
            key_decisions: Vec::new(),
            file_modifications: Vec::new(),
            app_state: serde_json::Map::new(),
            proactive_cache: None,
        }
    }

    pub fn next_turn_number(&self) -> u64 {
        self.completed_turns.last().map(|t| t.number + 1).unwrap_or(1)
    }

    pub fn push_tool_result(&mut self, result: ToolResult) {
        if self.tool_result_ring.len() >= self.tool_result_ring_capacity {
            self.tool_result_ring.pop_front();
        }
        self.tool_result_ring.push_back(result);
    }

    /// Appends a snippet, evicting the oldest one first if the store is at
    /// capacity.
    pub fn push_snippet(&mut self, snippet: CodeSnippet) {
        if self.snippets.len() >= self.snippet_capacity {
            self.snippets.remove(0);
        }
        self.snippets.push(snippet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_graph_matches_spec() {
        assert_eq!(
            TurnPhase::CallingLlm.legal_next(),
            &[TurnPhase::GeneratingResponse, TurnPhase::CallingTools]
        );
        assert_eq!(TurnPhase::Completed.legal_next(), &[] as &[TurnPhase]);
        assert!(TurnPhase::Completed.is_terminal());
        assert!(TurnPhase::Failed.is_terminal());
        assert!(!TurnPhase::CallingLlm.is_terminal());
    }

    #[test]
    fn tool_order_validity() {
        let mut turn = ConversationTurn::new(1, "hi".into());
        turn.tool_calls.push(ToolCallRecord {
            sequence_index: 0,
            name: "read".into(),
            args: serde_json::json!({}),
        });
        turn.tool_results.push(ToolResult {
            tool_name: "read".into(),
            args: serde_json::json!({}),
            raw_response: serde_json::json!("ok"),
            summary: None,
            is_error: false,
            turn_number: 1,
            sequence_index: 0,
        });
        assert!(turn.tool_order_is_valid());
    }

    fn snippet(path: &str, turn: u64) -> CodeSnippet {
        CodeSnippet {
            path: PathBuf::from(path),
            start_line: 1,
            end_line: 1,
            content: String::new(),
            last_accessed_turn: turn,
            access_count: 1,
            relevance_score: 0.0,
        }
    }

    #[test]
    fn snippet_store_evicts_oldest_first_once_at_capacity() {
        let mut state = ConversationState::with_snippet_capacity(10, 2);
        state.push_snippet(snippet("a.rs", 1));
        state.push_snippet(snippet("b.rs", 2));
        state.push_snippet(snippet("c.rs", 3));

        let paths: Vec<&str> = state.snippets.iter().map(|s| s.path.to_str().unwrap()).collect();
        assert_eq!(paths, vec!["b.rs", "c.rs"]);
    }

    #[test]
    fn tool_result_ring_evicts_oldest_first_once_at_capacity() {
        let mut state = ConversationState::with_snippet_capacity(2, 10);
        for i in 0..3u64 {
            state.push_tool_result(ToolResult {
                tool_name: format!("tool-{i}"),
                args: serde_json::json!({}),
                raw_response: serde_json::json!("ok"),
                summary: None,
                is_error: false,
                turn_number: i,
                sequence_index: 0,
            });
        }
        let names: Vec<&str> = state.tool_result_ring.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names, vec!["tool-1", "tool-2"]);
    }
}
