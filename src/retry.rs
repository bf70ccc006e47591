//! LLM Invocation Loop / Retry Controller: classifies LLM errors, decides
//! whether to retry, and progressively shrinks the context budget on
//! each attempt so a retry is strictly less likely to repeat the same
//! overflow or rate-limit failure.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::{ContextTargets, RetryConfig};
use crate::error::{AgentError, LlmErrorClass};

/// What the turn engine should do after an LLM call fails.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Wait `delay`, reduce context to `next_targets`, and retry.
    Retry { delay: Duration, next_targets: ContextTargets },
    /// Exhausted retries or the error is non-retryable; surface `error`.
    GiveUp { error: AgentError },
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) * (1 ± jitter)`,
/// capped at `cap_secs`. `attempt` is 1-indexed (the first retry is
/// attempt 1).
pub fn backoff_duration(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = config.base_delay_secs * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(config.cap_secs);
    let jitter_factor = if config.jitter > 0.0 {
        1.0 + rand::rng().random_range(-config.jitter..=config.jitter)
    } else {
        1.0
    };
    let secs = (capped * jitter_factor).max(0.0);
    Duration::from_secs_f64(secs)
}

/// Progressively reduces context targets for a retry attempt: attempt 2
/// keeps at most 2 recent turns, 3 snippets, 5 tool results, and drops
/// proactive context; attempt 3 and beyond keep at most 1 recent turn,
/// no snippets, and 2 tool results. Always monotonically non-increasing
/// relative to `current`.
pub fn reduce_targets(attempt: u32, current: ContextTargets) -> ContextTargets {
    match attempt {
        0 | 1 => current,
        2 => ContextTargets {
            recent_turns: current.recent_turns.min(2),
            snippets: current.snippets.min(3),
            tool_results: current.tool_results.min(5),
            include_proactive: false,
        },
        _ => ContextTargets {
            recent_turns: current.recent_turns.min(1),
            snippets: 0,
            tool_results: current.tool_results.min(2),
            include_proactive: false,
        },
    }
}

/// Drives the retry/backoff policy for one LLM call across its attempts.
/// A fresh `RetryController` is created per turn: attempt counts never
/// carry over across turns.
pub struct RetryController {
    config: RetryConfig,
    attempts_used: u32,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts_used: 0,
        }
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Call after an LLM invocation fails with `error`. Returns the next
    /// action: retry with a reduced budget and backoff, or give up.
    pub fn on_failure(&mut self, error: AgentError, current_targets: ContextTargets) -> RetryDecision {
        let Some(class) = error.llm_class() else {
            return RetryDecision::GiveUp { error };
        };
        if class == LlmErrorClass::NonRetryable {
            return RetryDecision::GiveUp { error };
        }
        if self.attempts_used >= self.config.max_retries {
            warn!(code = error.code(), attempts = self.attempts_used, "retry budget exhausted");
            return RetryDecision::GiveUp { error };
        }
        self.attempts_used += 1;
        let delay = backoff_duration(self.attempts_used, &self.config);
        let next_targets = reduce_targets(self.attempts_used + 1, current_targets);
        info!(
            code = error.code(),
            attempt = self.attempts_used,
            delay_secs = delay.as_secs_f64(),
            "retrying LLM call with reduced context"
        );
        RetryDecision::Retry { delay, next_targets }
    }
}
