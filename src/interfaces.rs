//! External interface contracts: the boundaries the turn engine
//! calls through, so the core stays decoupled from any concrete LLM
//! provider or tool runtime. Concrete implementations live outside this
//! crate; this module only defines the contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_model::{PromptPayload, TurnPhase};
use crate::error::AgentError;

/// One proposed tool invocation coming back from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedToolCall {
    pub name: String,
    pub args: Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    MaxTokens,
}

/// Usage reported by one LLM call: `{prompt_tokens, thinking_tokens,
/// output_tokens}`. Thinking tokens are logged separately and counted
/// toward total usage but never re-submitted in a follow-up prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub thinking_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.thinking_tokens + self.output_tokens
    }
}

/// One LLM call's outcome: `{content_parts, tool_calls, usage,
/// finish_reason}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content_parts: Vec<String>,
    pub tool_calls: Vec<ProposedToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        self.content_parts.join("")
    }
}

/// The LLM boundary. Implementations own auth, transport, and streaming;
/// they report failures as `AgentError` LLM variants so the retry
/// controller can classify them.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn invoke(&self, payload: &PromptPayload) -> Result<LlmResponse, AgentError>;
}

/// One tool invocation's outcome: `{response, is_error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationOutcome {
    pub response: Value,
    pub is_error: bool,
}

/// The tool-execution boundary. Implementations own sandboxing, argument
/// validation, and per-tool semantics; the turn engine only enforces the
/// timeout and the per-turn call cap around this call.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn invoke(&self, name: &str, args: &Value) -> ToolInvocationOutcome;
}

/// Unified event stream surfaced to the embedding application: a single
/// enum event bus rather than separate per-kind callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    AgentMessage { turn: u64, text: String },
    ToolCall { turn: u64, sequence_index: usize, name: String, args: Value },
    ToolResult { turn: u64, sequence_index: usize, name: String, is_error: bool },
    StatusUpdate { turn: u64, phase: TurnPhase, detail: String },
    Error { turn: Option<u64>, code: String, message: String },
}
