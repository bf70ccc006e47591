//! Typed configuration consumed by the turn engine.
//!
//! Loading (file discovery, env overlays, CLI merging) is an external
//! collaborator's job; this module only defines the value type the loader
//! hands to [`crate::turn_engine::TurnEngine`].

use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// How the embedding application wants status surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingMode {
    Interactive,
    NonInteractive,
    Quiet,
}

impl Default for LoggingMode {
    fn default() -> Self {
        Self::Interactive
    }
}

/// Context assembly targets; also used by the retry controller to express
/// progressively reduced budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTargets {
    pub recent_turns: usize,
    pub snippets: usize,
    pub tool_results: usize,
    pub include_proactive: bool,
}

impl Default for ContextTargets {
    fn default() -> Self {
        Self {
            recent_turns: 20,
            snippets: 25,
            tool_results: 30,
            include_proactive: true,
        }
    }
}

impl ContextTargets {
    /// Element-wise "not larger than" comparison, used to assert the retry
    /// controller's monotonic-reduction invariant.
    pub fn le(&self, other: &ContextTargets) -> bool {
        self.recent_turns <= other.recent_turns
            && self.snippets <= other.snippets
            && self.tool_results <= other.tool_results
            && (!self.include_proactive || other.include_proactive)
    }
}

/// Retry backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub cap_secs: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 1.0,
            cap_secs: 15.0,
            jitter: 0.2,
        }
    }
}

/// Top-level configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    pub thinking_enabled: bool,
    pub thinking_budget: u32,
    pub planning_enabled: bool,
    pub tool_call_cap: usize,
    pub tool_default_timeout_secs: u64,
    pub llm_total_timeout_secs: u64,
    pub retry: RetryConfig,
    pub context_targets: ContextTargets,
    pub proactive_gather_enabled: bool,
    pub workspace_root: PathBuf,
    pub safety_margin_tokens: usize,
    pub output_reserve_tokens: usize,
    pub logging_mode: LoggingMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "default-model".to_string(),
            thinking_enabled: false,
            thinking_budget: 0,
            planning_enabled: false,
            tool_call_cap: 25,
            tool_default_timeout_secs: 120,
            llm_total_timeout_secs: 300,
            retry: RetryConfig::default(),
            context_targets: ContextTargets::default(),
            proactive_gather_enabled: true,
            workspace_root: PathBuf::from("."),
            safety_margin_tokens: 1_000,
            output_reserve_tokens: 2_000,
            logging_mode: LoggingMode::Interactive,
        }
    }
}

/// Static facts about a model, looked up by name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelInfo {
    pub input_token_limit: usize,
    pub supports_thinking: bool,
    pub default_output_reserve: usize,
}

const CONSERVATIVE_DEFAULT: ModelInfo = ModelInfo {
    input_token_limit: 32_000,
    supports_thinking: false,
    default_output_reserve: 2_000,
};

/// Read-only mapping from model name to capability facts.
pub trait ModelRegistry: Send + Sync {
    fn lookup(&self, model: &str) -> ModelInfo;
}

/// A handful of well-known models, baked in for offline/test use. A real
/// deployment typically overrides this with a registry backed by the
/// provider's own model-listing endpoint.
pub struct StaticModelRegistry {
    models: HashMap<&'static str, ModelInfo>,
}

static BUILTIN_MODELS: Lazy<HashMap<&'static str, ModelInfo>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "claude-opus-4",
        ModelInfo {
            input_token_limit: 200_000,
            supports_thinking: true,
            default_output_reserve: 8_000,
        },
    );
    m.insert(
        "claude-sonnet-4",
        ModelInfo {
            input_token_limit: 200_000,
            supports_thinking: true,
            default_output_reserve: 8_000,
        },
    );
    m.insert(
        "gpt-4o",
        ModelInfo {
            input_token_limit: 128_000,
            supports_thinking: false,
            default_output_reserve: 4_000,
        },
    );
    m.insert(
        "default-model",
        ModelInfo {
            input_token_limit: 128_000,
            supports_thinking: false,
            default_output_reserve: 4_000,
        },
    );
    m
});

impl Default for StaticModelRegistry {
    fn default() -> Self {
        Self {
            models: BUILTIN_MODELS.clone(),
        }
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn lookup(&self, model: &str) -> ModelInfo {
        match self.models.get(model) {
            Some(info) => *info,
            None => {
                tracing::warn!(model, "no registry entry for model; using conservative defaults");
                CONSERVATIVE_DEFAULT
            }
        }
    }
}
