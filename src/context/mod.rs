//! Context Manager: produces a `PromptPayload` for each LLM call within
//! a fixed token budget while maximizing useful content.

mod budget;

pub use budget::compute_available_budget;

use std::path::PathBuf;

use tracing::info;

use crate::config::{AgentConfig, ContextTargets, ModelInfo};
use crate::correlator::CorrelationItem;
use crate::data_model::{
    AssemblyDecision, CodeSnippet, ConversationState, GenerationConfig, InclusionStatus, Message, PromptPayload,
    ToolSchema,
};
use crate::error::AgentError;
use crate::prioritizer::SmartPrioritizer;
use crate::summarizer::Summarizer;
use crate::token::TokenCounter;

/// Minimum remaining budget (tokens) below which proactive context is
/// skipped entirely rather than partially included.
const PROACTIVE_INCLUSION_THRESHOLD_TOKENS: usize = 200;

/// A fallback summary is tried for a snippet/tool-result that doesn't fit
/// verbatim before it is skipped outright, unless the candidate is
/// already a summary, in which case a shorter summary variant may be
/// substituted.
const SHORT_SUMMARY_TARGET_CHARS: usize = 400;

pub struct ContextManager {
    token_counter: TokenCounter,
    summarizer: Summarizer,
}

impl ContextManager {
    pub fn new(token_counter: TokenCounter, summarizer: Summarizer) -> Self {
        Self {
            token_counter,
            summarizer,
        }
    }

    /// Resets per-turn scratch state. The turn itself is opened by the
    /// state manager; this only clears transient relevance scores.
    pub fn begin_turn(&self, state: &mut ConversationState) {
        for snippet in &mut state.snippets {
            snippet.relevance_score = 0.0;
        }
    }

    /// Stores or updates a snippet, stamping recency against the turn the
    /// caller is currently assembling for.
    pub fn record_code_snippet(&self, state: &mut ConversationState, path: PathBuf, start_line: usize, end_line: usize, content: String, current_turn: u64) {
        if let Some(existing) = state
            .snippets
            .iter_mut()
            .find(|s| s.path == path && s.start_line == start_line && s.end_line == end_line)
        {
            existing.content = content;
            existing.touch(current_turn);
            return;
        }
        state.push_snippet(CodeSnippet {
            path,
            start_line,
            end_line,
            content,
            last_accessed_turn: current_turn,
            access_count: 1,
            relevance_score: 0.0,
        });
    }

    /// Assembles a `PromptPayload` within `budget` tokens, honoring
    /// `targets` exactly (the retry controller may pass reduced targets).
    pub fn assemble(
        &self,
        state: &ConversationState,
        model: ModelInfo,
        config: &AgentConfig,
        targets: ContextTargets,
        system_instruction: &str,
        tool_schemas: &[ToolSchema],
        current_user_text: &str,
    ) -> Result<Assembly, AgentError> {
        let mut decisions = Vec::new();
        let mut messages = Vec::new();

        let base_prompt_tokens = self.token_counter.count_text(system_instruction)
            + tool_schemas
                .iter()
                .map(|t| self.token_counter.count_text(&t.schema.to_string()) + self.token_counter.count_text(&t.name))
                .sum::<usize>();

        let available = compute_available_budget(
            model.input_token_limit,
            base_prompt_tokens,
            config.output_reserve_tokens,
            config.safety_margin_tokens,
        );
        let mut remaining = match available {
            Some(available) => available,
            None => return Err(AgentError::ContextOverflow),
        };

        // 1. Core goal / current user message: must fit, else fail.
        let user_message = Message::user(current_user_text.to_string());
        let user_cost = self.token_counter.count_message(&user_message);
        if user_cost > remaining {
            return Err(AgentError::ContextOverflow);
        }
        remaining -= user_cost;
        messages.push(user_message);
        decisions.push(AssemblyDecision {
            candidate: "current-user-message".to_string(),
            status: InclusionStatus::Included,
            reason: "core goal, always included".to_string(),
        });

        // 2. Recent conversation turns, newest first.
        let mut recent_turn_messages = Vec::new();
        for turn in state.completed_turns.iter().rev().take(targets.recent_turns) {
            let mut turn_msgs = Vec::new();
            if !turn.user_message.is_empty() {
                turn_msgs.push(Message::user(turn.user_message.clone()));
            }
            if !turn.agent_message.is_empty() {
                turn_msgs.push(Message::assistant(turn.agent_message.clone()));
            }
            let cost: usize = turn_msgs.iter().map(|m| self.token_counter.count_message(m)).sum();
            if cost <= remaining {
                remaining -= cost;
                recent_turn_messages.push(turn_msgs);
                decisions.push(AssemblyDecision {
                    candidate: format!("turn-{}", turn.number),
                    status: InclusionStatus::Included,
                    reason: "within recent-turns target and budget".to_string(),
                });
            } else {
                decisions.push(AssemblyDecision {
                    candidate: format!("turn-{}", turn.number),
                    status: InclusionStatus::Skipped,
                    reason: "budget-exceeded".to_string(),
                });
            }
        }
        // newest-first collection built in reverse; restore chronological
        // order for the final message list.
        for turn_msgs in recent_turn_messages.into_iter().rev() {
            messages.extend(turn_msgs);
        }

        // 3 & 4. Smart-prioritized snippets and tool results, with
        // correlation-based reordering (step 7) folded in by clustering
        // before token packing rather than after.
        let prioritizer = SmartPrioritizer::new(state.next_turn_number().saturating_sub(1));
        let ranked_snippets = prioritizer.rank_snippets(&state.snippets, current_user_text);
        let ranked_tool_results: Vec<_> = state.tool_result_ring.iter().collect();
        let ranked_tool_results = prioritizer.rank_tool_results(
            &ranked_tool_results.into_iter().cloned().collect::<Vec<_>>(),
            current_user_text,
        );

        let snippet_order = correlation_order_snippets(&ranked_snippets);
        let mut snippets_included = 0usize;
        for idx in snippet_order {
            if snippets_included >= targets.snippets {
                break;
            }
            let scored = &ranked_snippets[idx];
            let candidate = format!("snippet:{}", scored.snippet.path.display());
            let text = format!("{}:{}-{}\n{}", scored.snippet.path.display(), scored.snippet.start_line, scored.snippet.end_line, scored.snippet.content);
            let message = Message::system(text);
            let cost = self.token_counter.count_message(&message);
            if cost <= remaining {
                remaining -= cost;
                messages.push(message);
                snippets_included += 1;
                decisions.push(AssemblyDecision {
                    candidate,
                    status: InclusionStatus::Included,
                    reason: "prioritized snippet fit in remaining budget".to_string(),
                });
            } else {
                let short = self.summarizer.summarize_to(&scored.snippet.content, Some(&scored.snippet.path.to_string_lossy()), SHORT_SUMMARY_TARGET_CHARS);
                let short_message = Message::system(short);
                let short_cost = self.token_counter.count_message(&short_message);
                if short_cost <= remaining {
                    remaining -= short_cost;
                    messages.push(short_message);
                    snippets_included += 1;
                    decisions.push(AssemblyDecision {
                        candidate,
                        status: InclusionStatus::Included,
                        reason: "included as shorter summary variant".to_string(),
                    });
                } else {
                    decisions.push(AssemblyDecision {
                        candidate,
                        status: InclusionStatus::Skipped,
                        reason: "budget-exceeded".to_string(),
                    });
                }
            }
        }

        let mut tool_results_included = 0usize;
        for scored in ranked_tool_results.iter().take(targets.tool_results) {
            let candidate = format!("tool-result:{}#{}", scored.tool_result.tool_name, scored.tool_result.sequence_index);
            let text = scored.tool_result.prompt_text();
            let message = Message::tool(text);
            let cost = self.token_counter.count_message(&message);
            if cost <= remaining {
                remaining -= cost;
                messages.push(message);
                tool_results_included += 1;
                decisions.push(AssemblyDecision {
                    candidate,
                    status: InclusionStatus::Included,
                    reason: "prioritized tool result fit in remaining budget".to_string(),
                });
            } else {
                let short = self.summarizer.summarize_to(&message.content, None, SHORT_SUMMARY_TARGET_CHARS);
                let short_message = Message::tool(short);
                let short_cost = self.token_counter.count_message(&short_message);
                if short_cost <= remaining {
                    remaining -= short_cost;
                    messages.push(short_message);
                    tool_results_included += 1;
                    decisions.push(AssemblyDecision {
                        candidate,
                        status: InclusionStatus::Included,
                        reason: "included as shorter summary variant".to_string(),
                    });
                } else {
                    decisions.push(AssemblyDecision {
                        candidate,
                        status: InclusionStatus::Skipped,
                        reason: "budget-exceeded".to_string(),
                    });
                }
            }
        }
        let _ = (snippets_included, tool_results_included);

        // 5. Key decisions / file modifications as compact bullets.
        if !state.key_decisions.is_empty() || !state.file_modifications.is_empty() {
            let mut bullets = String::new();
            for decision in &state.key_decisions {
                bullets.push_str("- decision: ");
                bullets.push_str(decision);
                bullets.push('\n');
            }
            for path in &state.file_modifications {
                bullets.push_str("- modified: ");
                bullets.push_str(&path.display().to_string());
                bullets.push('\n');
            }
            let message = Message::system(bullets);
            let cost = self.token_counter.count_message(&message);
            if cost <= remaining {
                remaining -= cost;
                messages.push(message);
                decisions.push(AssemblyDecision {
                    candidate: "key-decisions-and-file-mods".to_string(),
                    status: InclusionStatus::Included,
                    reason: "compact bullets fit in remaining budget".to_string(),
                });
            } else {
                decisions.push(AssemblyDecision {
                    candidate: "key-decisions-and-file-mods".to_string(),
                    status: InclusionStatus::Skipped,
                    reason: "budget-exceeded".to_string(),
                });
            }
        }

        // 6. Proactive context, partial inclusion in priority order, only
        // if remaining budget clears the inclusion threshold.
        if targets.include_proactive && remaining >= PROACTIVE_INCLUSION_THRESHOLD_TOKENS {
            if let Some(proactive) = &state.proactive_cache {
                for section in proactive.as_prompt_sections() {
                    let message = Message::system(section);
                    let cost = self.token_counter.count_message(&message);
                    if cost <= remaining {
                        remaining -= cost;
                        messages.push(message);
                        decisions.push(AssemblyDecision {
                            candidate: "proactive-context-section".to_string(),
                            status: InclusionStatus::Included,
                            reason: "proactive section fit in remaining budget".to_string(),
                        });
                    } else {
                        decisions.push(AssemblyDecision {
                            candidate: "proactive-context-section".to_string(),
                            status: InclusionStatus::Skipped,
                            reason: "budget-exceeded".to_string(),
                        });
                    }
                }
            }
        } else if targets.include_proactive {
            decisions.push(AssemblyDecision {
                candidate: "proactive-context".to_string(),
                status: InclusionStatus::Excluded,
                reason: "remaining budget below proactive-inclusion threshold".to_string(),
            });
        }

        let consumed = messages.iter().map(|m| self.token_counter.count_message(m)).sum::<usize>();
        let final_count = base_prompt_tokens + consumed;

        info!(
            included = decisions.iter().filter(|d| d.status == InclusionStatus::Included).count(),
            skipped = decisions.iter().filter(|d| d.status == InclusionStatus::Skipped).count(),
            excluded = decisions.iter().filter(|d| d.status == InclusionStatus::Excluded).count(),
            token_count = final_count,
            "context assembly complete"
        );

        let payload = PromptPayload {
            system_instruction: system_instruction.to_string(),
            messages,
            tool_schemas: tool_schemas.to_vec(),
            generation_config: GenerationConfig {
                model: config.model.clone(),
                thinking_budget: config.thinking_budget,
                temperature: 0.2,
            },
            estimated_token_count: final_count,
        };

        Ok(Assembly { payload, decisions })
    }
}

/// A prioritized list plus its correlation-clustered visitation order,
/// expressed as indices into the prioritized slice. Reorder only, never
/// adds new items or spends new tokens.
fn correlation_order_snippets(ranked: &[crate::prioritizer::ScoredSnippet<'_>]) -> Vec<usize> {
    if ranked.len() <= 1 {
        return (0..ranked.len()).collect();
    }
    let items: Vec<CorrelationItem> = ranked
        .iter()
        .enumerate()
        .map(|(i, s)| CorrelationItem {
            id: i,
            path: Some(s.snippet.path.to_string_lossy().to_string()),
            turn: s.snippet.last_accessed_turn,
            text: s.snippet.content.clone(),
            is_error: false,
            tool_name: None,
        })
        .collect();
    crate::correlator::reorder_by_correlation(&items)
}

/// The result of one assembly: the payload plus a decision log. Each
/// decision is logged with status INCLUDED/SKIPPED/EXCLUDED and a reason.
pub struct Assembly {
    pub payload: PromptPayload,
    pub decisions: Vec<AssemblyDecision>,
}
