//! State Manager: owns `ConversationState`, validates phase transitions,
//! and serializes all mutation. At most one in-flight turn.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::data_model::{
    ConversationState, ConversationTurn, ErrorInfo, ToolCallRecord, ToolResult, TurnPhase,
};
use crate::error::AgentError;

/// Owns a single session's `ConversationState` and enforces its phase
/// graph. Not `Clone`/`Sync` by design: the turn engine holds exclusive
/// `&mut` access for the lifetime of a turn, a single-writer rule.
pub struct StateManager {
    state: ConversationState,
}

impl StateManager {
    pub fn new(tool_result_ring_capacity: usize) -> Self {
        Self {
            state: ConversationState::new(tool_result_ring_capacity),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    /// Allocates a new turn with phase `Init`. Fails fast if a turn is
    /// already in progress rather than queuing silently.
    pub fn start_turn(&mut self, user_text: String) -> Result<u64, AgentError> {
        if self.state.current_turn.is_some() {
            warn!("start_turn called while a turn is already in progress");
            return Err(AgentError::StateTurnAlreadyInProgress);
        }
        let number = self.state.next_turn_number();
        info!(turn = number, "turn started");
        self.state.current_turn = Some(ConversationTurn::new(number, user_text));
        Ok(number)
    }

    fn current_turn_mut(&mut self) -> Result<&mut ConversationTurn, AgentError> {
        self.state.current_turn.as_mut().ok_or_else(|| AgentError::StateInvalidTransition {
            from: "NoTurn".to_string(),
            to: "???".to_string(),
        })
    }

    /// Validates and applies a phase transition against the legal graph.
    pub fn advance(&mut self, to: TurnPhase) -> Result<(), AgentError> {
        let turn = self.current_turn_mut()?;
        let from = turn.phase;
        let legal = from.legal_next().contains(&to);
        if !legal {
            error!(?from, ?to, "invalid turn phase transition");
            return Err(AgentError::StateInvalidTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        }
        info!(turn = turn.number, ?from, ?to, "turn phase advanced");
        turn.phase = to;
        Ok(())
    }

    /// Appends a tool call; only legal in `CallingTools` or
    /// `ProcessingToolResults`.
    pub fn add_tool_call(&mut self, name: String, args: Value) -> Result<usize, AgentError> {
        let turn = self.current_turn_mut()?;
        if !matches!(turn.phase, TurnPhase::CallingTools | TurnPhase::ProcessingToolResults) {
            return Err(AgentError::StateInvalidTransition {
                from: format!("{:?}", turn.phase),
                to: "CallingTools".to_string(),
            });
        }
        let sequence_index = turn.tool_calls.len();
        turn.tool_calls.push(ToolCallRecord {
            sequence_index,
            name,
            args,
        });
        Ok(sequence_index)
    }

    /// Appends a tool result, mirroring it into the bounded ring buffer
    /// the context manager draws tool-result candidates from.
    pub fn add_tool_result(&mut self, result: ToolResult) -> Result<(), AgentError> {
        {
            let turn = self.current_turn_mut()?;
            if !matches!(turn.phase, TurnPhase::CallingTools | TurnPhase::ProcessingToolResults) {
                return Err(AgentError::StateInvalidTransition {
                    from: format!("{:?}", turn.phase),
                    to: "ProcessingToolResults".to_string(),
                });
            }
            turn.tool_results.push(result.clone());
        }
        self.state.push_tool_result(result);
        Ok(())
    }

    /// Sets the final agent message; only legal from `GeneratingResponse`
    /// onward.
    pub fn set_agent_message(&mut self, text: String) -> Result<(), AgentError> {
        let turn = self.current_turn_mut()?;
        if !matches!(turn.phase, TurnPhase::GeneratingResponse | TurnPhase::Completed) {
            return Err(AgentError::StateInvalidTransition {
                from: format!("{:?}", turn.phase),
                to: "GeneratingResponse".to_string(),
            });
        }
        turn.agent_message = text;
        Ok(())
    }

    pub fn add_system_message(&mut self, text: String) -> Result<(), AgentError> {
        let turn = self.current_turn_mut()?;
        turn.system_messages.push(text);
        Ok(())
    }

    /// Completes the current turn, moving it to `Completed`, stamping the
    /// timestamp, and appending it to the turn log.
    pub fn complete_turn(&mut self) -> Result<(), AgentError> {
        self.advance(TurnPhase::Completed)?;
        let mut turn = self.state.current_turn.take().ok_or(AgentError::StateInvalidTransition {
            from: "NoTurn".to_string(),
            to: "Completed".to_string(),
        })?;
        turn.completed_at_millis = Some(now_millis());
        info!(turn = turn.number, "turn completed");
        self.state.completed_turns.push(turn);
        Ok(())
    }

    /// Fails the current turn with the given error info, from any phase.
    pub fn fail_turn(&mut self, error_info: ErrorInfo) -> Result<(), AgentError> {
        let mut turn = self.state.current_turn.take().ok_or(AgentError::StateInvalidTransition {
            from: "NoTurn".to_string(),
            to: "Failed".to_string(),
        })?;
        warn!(turn = turn.number, code = %error_info.code, "turn failed");
        turn.phase = TurnPhase::Failed;
        turn.completed_at_millis = Some(now_millis());
        turn.error_info = Some(error_info);
        self.state.completed_turns.push(turn);
        Ok(())
    }
}

fn now_millis() -> u128 {
    chrono::Utc::now().timestamp_millis().max(0) as u128
}
