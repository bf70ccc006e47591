//! Agent Turn Engine: the stateful, concurrent core of an interactive AI
//! engineering assistant. Token-bounded context assembly, an optional
//! plan/approve/execute negotiation, a retrying LLM invocation loop, and
//! tool dispatch, all driven through a well-defined per-turn state
//! machine.
//!
//! This crate defines the core and its external interface contracts
//! ([`interfaces::LlmProvider`], [`interfaces::ToolRuntime`]); concrete
//! providers, tool bodies, and configuration loading are the embedding
//! application's responsibility.

pub mod cancellation;
pub mod config;
pub mod context;
pub mod correlator;
pub mod data_model;
pub mod dynamic_expander;
pub mod error;
pub mod interfaces;
pub mod loop_detector;
pub mod planning;
pub mod prioritizer;
pub mod proactive;
pub mod retry;
pub mod state;
pub mod summarizer;
pub mod token;
pub mod tool_dispatch;
pub mod turn_engine;

pub use cancellation::CancellationToken;
pub use config::AgentConfig;
pub use data_model::{ConversationState, ConversationTurn, PromptPayload};
pub use error::{AgentError, AgentResult};
pub use turn_engine::TurnEngine;
