//! Error kinds for the agent turn engine.
//!
//! Every variant carries a stable code, a user-visible phrasing, and a
//! propagation policy enforced by the callers in this crate: tool errors
//! are captured into `ToolResult`s, LLM errors flow through the retry
//! controller, state errors fail the turn.

use thiserror::Error;

/// Classification of an LLM provider error, used to decide retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorClass {
    /// HTTP 429 / resource exhausted / 5xx / provider "INTERNAL".
    RetryableTransient,
    /// Provider reports the prompt itself was too large for the window.
    RetryableContext,
    /// Auth, invalid request, content policy, explicit cancellation.
    NonRetryable,
}

/// Top-level error type surfaced by the turn engine and its subsystems.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("LLM.RateLimit: the provider is rate-limiting requests; context was reduced and retried {attempts} time(s)")]
    LlmRateLimit { attempts: u32 },

    #[error("LLM.ServerError: the provider is unavailable; context was reduced and retried {attempts} time(s)")]
    LlmServerError { attempts: u32 },

    #[error("LLM.Timeout: the provider did not respond in time; context was reduced and retried {attempts} time(s)")]
    LlmTimeout { attempts: u32 },

    #[error("LLM.ContextOverflow: the prompt is too large for this model; try shortening the conversation")]
    LlmContextOverflow,

    #[error("LLM.ContentPolicy: the provider rejected this request on content-policy grounds: {message}")]
    LlmContentPolicy { message: String },

    #[error("LLM.AuthError: authentication with the provider failed: {message}")]
    LlmAuthError { message: String },

    #[error("LLM.BadRequest: the provider rejected this request: {message}")]
    LlmBadRequest { message: String },

    #[error("Tool.Timeout: tool '{tool_name}' did not complete within {timeout_secs}s")]
    ToolTimeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool.ExecutionError: tool '{tool_name}' failed: {message}")]
    ToolExecutionError { tool_name: String, message: String },

    #[error("Tool.LoopCapExceeded: the agent hit its tool-call budget of {cap} calls for this turn")]
    ToolLoopCapExceeded { cap: usize },

    #[error("State.InvalidTransition: cannot move from {from:?} to {to:?}")]
    StateInvalidTransition { from: String, to: String },

    #[error("State.TurnAlreadyInProgress: a turn is already open for this session")]
    StateTurnAlreadyInProgress,

    #[error("Context.Overflow: base prompt plus reserves leave no room for any content")]
    ContextOverflow,

    #[error("Core.Cancelled")]
    Cancelled,

    #[error("Core.Fatal: {message}")]
    Fatal { message: String },
}

impl AgentError {
    /// Stable machine-readable code, e.g. for telemetry correlation.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LlmRateLimit { .. } => "LLM.RateLimit",
            Self::LlmServerError { .. } => "LLM.ServerError",
            Self::LlmTimeout { .. } => "LLM.Timeout",
            Self::LlmContextOverflow => "LLM.ContextOverflow",
            Self::LlmContentPolicy { .. } => "LLM.ContentPolicy",
            Self::LlmAuthError { .. } => "LLM.AuthError",
            Self::LlmBadRequest { .. } => "LLM.BadRequest",
            Self::ToolTimeout { .. } => "Tool.Timeout",
            Self::ToolExecutionError { .. } => "Tool.ExecutionError",
            Self::ToolLoopCapExceeded { .. } => "Tool.LoopCapExceeded",
            Self::StateInvalidTransition { .. } => "State.InvalidTransition",
            Self::StateTurnAlreadyInProgress => "State.InvalidTransition",
            Self::ContextOverflow => "Context.Overflow",
            Self::Cancelled => "Core.Cancelled",
            Self::Fatal { .. } => "Core.Fatal",
        }
    }

    /// Classify an error for retry purposes; only LLM errors are retryable.
    pub fn llm_class(&self) -> Option<LlmErrorClass> {
        match self {
            Self::LlmRateLimit { .. } | Self::LlmServerError { .. } | Self::LlmTimeout { .. } => {
                Some(LlmErrorClass::RetryableTransient)
            }
            Self::LlmContextOverflow => Some(LlmErrorClass::RetryableContext),
            Self::LlmContentPolicy { .. } | Self::LlmAuthError { .. } | Self::LlmBadRequest { .. } => {
                Some(LlmErrorClass::NonRetryable)
            }
            _ => None,
        }
    }
}

/// Integration seam for opaque provider/tool-runtime errors: anything
/// bubbling up as `anyhow::Error` from outside this crate's own typed
/// errors is folded into `Core.Fatal` before it can cross a public API
/// boundary, the usual `anyhow` (glue) + `thiserror` (domain) split
/// between adapter layers and an agent core.
impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Fatal { message: err.to_string() }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
