//! Turn Engine: the top-level loop binding the Context Manager, Planning
//! Manager, State Manager, and Retry Controller to an external LLM
//! provider and tool runtime.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::{AgentConfig, ModelRegistry};
use crate::context::ContextManager;
use crate::data_model::{ErrorInfo, ToolResult, ToolSchema, TurnPhase};
use crate::error::AgentError;
use crate::interfaces::{AgentEvent, FinishReason, LlmProvider, ToolRuntime};
use crate::loop_detector::LoopDetector;
use crate::planning::{FeedbackClassification, PlanningManager, PlanningState};
use crate::retry::{RetryController, RetryDecision};
use crate::state::StateManager;

/// Binds every subsystem for one session. Not `Clone`: owns the single
/// writer to the session's `ConversationState`.
pub struct TurnEngine {
    state: StateManager,
    context: ContextManager,
    planning: PlanningManager,
    registry: Arc<dyn ModelRegistry>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolRuntime>,
    config: AgentConfig,
    events: Option<UnboundedSender<AgentEvent>>,
}

impl TurnEngine {
    pub fn new(
        config: AgentConfig,
        context: ContextManager,
        registry: Arc<dyn ModelRegistry>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolRuntime>,
        tool_result_ring_capacity: usize,
    ) -> Self {
        let planning = PlanningManager::new(config.planning_enabled);
        Self {
            state: StateManager::new(tool_result_ring_capacity),
            context,
            planning,
            registry,
            llm,
            tools,
            config,
            events: None,
        }
    }

    pub fn with_event_sink(mut self, sink: UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn state(&self) -> &crate::data_model::ConversationState {
        self.state.state()
    }

    pub fn planning_state(&self) -> PlanningState {
        self.planning.state()
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(sink) = &self.events {
            let _ = sink.send(event);
        }
    }

    /// Drives one full user turn to completion (or failure). On success,
    /// the turn's final agent message is available via
    /// `self.state().completed_turns.last()`. `cancellation` is raced
    /// against every in-flight LLM/tool await; once cancelled the turn
    /// aborts immediately, is never retried, and fails with
    /// `AgentError::Cancelled`.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        system_instruction: &str,
        tool_schemas: &[ToolSchema],
        cancellation: &CancellationToken,
    ) -> Result<(), AgentError> {
        let turn_number = self.state.start_turn(user_text.to_string())?;
        self.emit(AgentEvent::StatusUpdate {
            turn: turn_number,
            phase: TurnPhase::Init,
            detail: "turn started".to_string(),
        });
        if cancellation.is_cancelled() {
            return Err(self.cancel_turn());
        }
        self.state.advance(TurnPhase::ProcessingUserInput)?;
        self.context.begin_turn(self.state.state_mut());

        if self.config.proactive_gather_enabled && self.state.state().proactive_cache.is_none() {
            let gathered = crate::proactive::gather(&self.config.workspace_root).await;
            self.state.state_mut().proactive_cache = Some(gathered);
        }

        if self.planning.enabled() && self.planning.state() == PlanningState::AwaitingApproval {
            return self.handle_planning_feedback(turn_number, user_text, system_instruction, cancellation).await;
        }
        if self.planning.should_intercept(user_text) {
            return self.run_planning_proposal(turn_number, user_text, system_instruction, cancellation).await;
        }

        self.drive_to_completion(turn_number, user_text, system_instruction, tool_schemas, cancellation).await
    }

    async fn run_planning_proposal(
        &mut self,
        turn_number: u64,
        user_text: &str,
        system_instruction: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), AgentError> {
        self.state.advance(TurnPhase::AssemblingContext)?;
        let model = self.registry.lookup(&self.config.model);
        let assembly = self.context.assemble(
            self.state.state(),
            model,
            &self.config,
            self.config.context_targets,
            system_instruction,
            &[],
            user_text,
        )?;
        self.state.advance(TurnPhase::CallingLlm)?;
        let response = self.invoke_llm_once(&assembly.payload, cancellation).await?;
        self.state.advance(TurnPhase::GeneratingResponse)?;
        let plan_text = response.text();
        self.planning.propose(plan_text.clone());
        self.state.set_agent_message(plan_text.clone())?;
        self.emit(AgentEvent::AgentMessage { turn: turn_number, text: plan_text });
        self.state.complete_turn()?;
        Ok(())
    }

    async fn handle_planning_feedback(
        &mut self,
        turn_number: u64,
        user_text: &str,
        system_instruction: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), AgentError> {
        match self.planning.handle_feedback(user_text) {
            FeedbackClassification::Approve => {
                if let Some(plan) = self.planning.proposed_plan.clone() {
                    self.state.state_mut().key_decisions.push(format!("approved plan: {plan}"));
                }
                self.drive_to_completion(turn_number, user_text, system_instruction, &[], cancellation).await
            }
            FeedbackClassification::Revision => self.run_planning_proposal(turn_number, user_text, system_instruction, cancellation).await,
            FeedbackClassification::NewRequest => self.drive_to_completion(turn_number, user_text, system_instruction, &[], cancellation).await,
        }
    }

    /// The LLM-call/tool-loop portion of a turn, shared by a plain turn
    /// and a plan's EXECUTING_PLAN continuation.
    async fn drive_to_completion(
        &mut self,
        turn_number: u64,
        user_text: &str,
        system_instruction: &str,
        tool_schemas: &[ToolSchema],
        cancellation: &CancellationToken,
    ) -> Result<(), AgentError> {
        let model = self.registry.lookup(&self.config.model);
        let mut tool_calls_made = 0usize;
        let mut loop_detector = LoopDetector::default();

        loop {
            if cancellation.is_cancelled() {
                return Err(self.cancel_turn());
            }
            self.state.advance(TurnPhase::AssemblingContext)?;

            let mut attempt_targets = self.config.context_targets;
            let mut retry = RetryController::new(self.config.retry);
            let mut advanced_to_calling_llm = false;

            let response = loop {
                let assembly = self.context.assemble(
                    self.state.state(),
                    model,
                    &self.config,
                    attempt_targets,
                    system_instruction,
                    tool_schemas,
                    user_text,
                )?;
                // Only the first attempt is a phase transition; retries
                // within the same round stay in CALLING_LLM, there is no
                // dedicated "retrying" phase.
                if !advanced_to_calling_llm {
                    self.state.advance(TurnPhase::CallingLlm)?;
                    advanced_to_calling_llm = true;
                }

                match self.invoke_llm_once(&assembly.payload, cancellation).await {
                    Ok(resp) => break resp,
                    Err(err) => match retry.on_failure(err, attempt_targets) {
                        RetryDecision::Retry { delay, next_targets } => {
                            tokio::time::sleep(delay).await;
                            attempt_targets = next_targets;
                        }
                        RetryDecision::GiveUp { error } => {
                            self.fail_turn(error.clone())?;
                            return Err(error);
                        }
                    },
                }
            };

            if response.finish_reason == FinishReason::ToolCalls && !response.tool_calls.is_empty() {
                self.state.advance(TurnPhase::CallingTools)?;

                // Bookkeeping pass: enforce the cap and loop detector, and
                // record each call's sequence index, in the LLM's original
                // order. Tool-result ordering must match tool-call ordering
                // regardless of dispatch concurrency.
                let mut sequence_indices = Vec::with_capacity(response.tool_calls.len());
                for call in &response.tool_calls {
                    tool_calls_made += 1;
                    if tool_calls_made > self.config.tool_call_cap {
                        let error = AgentError::ToolLoopCapExceeded { cap: self.config.tool_call_cap };
                        self.fail_turn(error.clone())?;
                        return Err(error);
                    }
                    if loop_detector.record(&call.name, &call.args) {
                        warn!(tool = %call.name, turn = turn_number, "tool-call loop detected, same call repeating");
                    }
                    let sequence_index = self.state.add_tool_call(call.name.clone(), call.args.clone())?;
                    self.emit(AgentEvent::ToolCall {
                        turn: turn_number,
                        sequence_index,
                        name: call.name.clone(),
                        args: call.args.clone(),
                    });
                    sequence_indices.push(sequence_index);
                }

                // Dispatch pass: maximal runs of read-only calls execute
                // concurrently; a write-capable call is serialized before
                // the next read-only run begins.
                let mut outcomes: Vec<Option<ToolResult>> = (0..response.tool_calls.len()).map(|_| None).collect();
                for (group, indices) in crate::tool_dispatch::batch_calls(&response.tool_calls) {
                    match group {
                        crate::tool_dispatch::DispatchGroup::Parallel => {
                            let futures_for_run = indices.iter().map(|&i| {
                                let call = &response.tool_calls[i];
                                self.invoke_tool_with_timeout(turn_number, sequence_indices[i], &call.name, &call.args)
                            });
                            let outcome = tokio::select! {
                                _ = cancellation.cancelled() => None,
                                results = futures::future::join_all(futures_for_run) => Some(results),
                            };
                            let Some(results) = outcome else {
                                return Err(self.cancel_turn());
                            };
                            for (i, result) in indices.into_iter().zip(results) {
                                outcomes[i] = Some(result);
                            }
                        }
                        crate::tool_dispatch::DispatchGroup::Serial => {
                            let i = indices[0];
                            let call = &response.tool_calls[i];
                            let outcome = tokio::select! {
                                _ = cancellation.cancelled() => None,
                                result = self.invoke_tool_with_timeout(turn_number, sequence_indices[i], &call.name, &call.args) => Some(result),
                            };
                            let Some(result) = outcome else {
                                return Err(self.cancel_turn());
                            };
                            outcomes[i] = Some(result);
                        }
                    }
                }

                // Recording pass: append results in original order.
                let mut error_texts = Vec::new();
                for (i, tool_result) in outcomes.into_iter().enumerate() {
                    let tool_result = tool_result.expect("every call index is assigned exactly one outcome");
                    let is_error = tool_result.is_error;
                    let name = response.tool_calls[i].name.clone();
                    if is_error {
                        error_texts.push(tool_result.prompt_text());
                    }
                    self.state.add_tool_result(tool_result)?;
                    self.emit(AgentEvent::ToolResult {
                        turn: turn_number,
                        sequence_index: sequence_indices[i],
                        name,
                        is_error,
                    });
                }

                // Dynamic Expander: a failing tool result that reads as a
                // file-not-found/import error triggers discovery of the
                // files it implicates, stored as snippets for the next
                // assembly.
                for error_text in &error_texts {
                    self.expand_from_tool_error(turn_number, error_text).await;
                }

                self.state.advance(TurnPhase::ProcessingToolResults)?;
                continue;
            }

            self.state.advance(TurnPhase::GeneratingResponse)?;
            let text = response.text();
            self.state.set_agent_message(text.clone())?;
            self.emit(AgentEvent::AgentMessage { turn: turn_number, text });
            self.state.complete_turn()?;
            if self.planning.state() == PlanningState::ExecutingPlan {
                self.planning.finish_execution();
            }
            info!(turn = turn_number, tool_calls = tool_calls_made, "turn completed");
            return Ok(());
        }
    }

    async fn invoke_llm_once(
        &self,
        payload: &crate::data_model::PromptPayload,
        cancellation: &CancellationToken,
    ) -> Result<crate::interfaces::LlmResponse, AgentError> {
        let budget = Duration::from_secs(self.config.llm_total_timeout_secs);
        let result = tokio::select! {
            _ = cancellation.cancelled() => return Err(AgentError::Cancelled),
            outcome = tokio::time::timeout(budget, self.llm.invoke(payload)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(AgentError::LlmTimeout { attempts: 1 }),
            },
        };
        if let Ok(response) = &result {
            // thinking tokens count toward usage but are never resubmitted
            info!(
                prompt_tokens = response.usage.prompt_tokens,
                thinking_tokens = response.usage.thinking_tokens,
                output_tokens = response.usage.output_tokens,
                "llm call usage"
            );
        }
        result
    }

    async fn invoke_tool_with_timeout(&self, turn_number: u64, sequence_index: usize, name: &str, args: &Value) -> ToolResult {
        let timeout_secs = self.config.tool_default_timeout_secs;
        let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), self.tools.invoke(name, args)).await;
        match outcome {
            Ok(outcome) => ToolResult {
                tool_name: name.to_string(),
                args: args.clone(),
                raw_response: outcome.response,
                summary: None,
                is_error: outcome.is_error,
                turn_number,
                sequence_index,
            },
            Err(_) => ToolResult {
                tool_name: name.to_string(),
                args: args.clone(),
                raw_response: Value::Null,
                summary: Some(format!("tool '{name}' did not complete within {timeout_secs}s")),
                is_error: true,
                turn_number,
                sequence_index,
            },
        }
    }

    /// Runs the error-driven Dynamic Expander strategy against one failing
    /// tool result's text and stores whatever it turns up. Best-effort:
    /// a workspace with nothing matching simply yields no snippets.
    async fn expand_from_tool_error(&mut self, turn_number: u64, error_text: &str) {
        let found = crate::dynamic_expander::expand_from_error(&self.config.workspace_root, error_text, turn_number).await;
        for expanded in found {
            debug!(
                turn = turn_number,
                path = %expanded.snippet.path.display(),
                reason = %expanded.provenance.reason,
                "dynamic expander stored snippet"
            );
            self.context.record_code_snippet(
                self.state.state_mut(),
                expanded.snippet.path,
                expanded.snippet.start_line,
                expanded.snippet.end_line,
                expanded.snippet.content,
                turn_number,
            );
        }
    }

    fn fail_turn(&mut self, error: AgentError) -> Result<(), AgentError> {
        self.state.fail_turn(ErrorInfo {
            code: error.code().to_string(),
            message: error.to_string(),
        })
    }

    /// Aborts the in-flight turn immediately on cancellation: never
    /// retried, always recorded as FAILED with `Core.Cancelled`.
    fn cancel_turn(&mut self) -> AgentError {
        let error = AgentError::Cancelled;
        if let Err(state_err) = self.fail_turn(error.clone()) {
            warn!(error = %state_err, "could not record cancelled turn's state transition");
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticModelRegistry;
    use crate::interfaces::{LlmResponse, ProposedToolCall, ToolInvocationOutcome, TokenUsage};
    use crate::summarizer::Summarizer;
    use crate::token::{CalibratedTokenEstimator, TokenCounter};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<Vec<LlmResponse>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn invoke(&self, _payload: &crate::data_model::PromptPayload) -> Result<LlmResponse, AgentError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(LlmResponse {
                    content_parts: vec!["done".to_string()],
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::Stop,
                });
            }
            Ok(responses.remove(0))
        }
    }

    struct EchoTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolRuntime for EchoTool {
        async fn invoke(&self, _name: &str, _args: &Value) -> ToolInvocationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolInvocationOutcome {
                response: serde_json::json!({"ok": true}),
                is_error: false,
            }
        }
    }

    fn context_manager() -> ContextManager {
        ContextManager::new(TokenCounter::new(Arc::new(CalibratedTokenEstimator::default())), Summarizer::default())
    }

    #[tokio::test]
    async fn plain_turn_with_no_tool_calls_completes() {
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(vec![]) });
        let tools = Arc::new(EchoTool { calls: AtomicUsize::new(0) });
        let mut engine = TurnEngine::new(
            AgentConfig::default(),
            context_manager(),
            Arc::new(StaticModelRegistry::default()),
            llm,
            tools,
            50,
        );
        engine.run_turn("hello there", "system prompt", &[], &CancellationToken::new()).await.unwrap();
        assert_eq!(engine.state().completed_turns.len(), 1);
        assert_eq!(engine.state().completed_turns[0].agent_message, "done");
    }

    #[tokio::test]
    async fn turn_with_one_round_of_tool_calls_then_final_response() {
        let tool_call_response = LlmResponse {
            content_parts: vec![],
            tool_calls: vec![ProposedToolCall { name: "read".to_string(), args: serde_json::json!({"path": "a.rs"}) }],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::ToolCalls,
        };
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(vec![tool_call_response]) });
        let tools = Arc::new(EchoTool { calls: AtomicUsize::new(0) });
        let mut engine = TurnEngine::new(
            AgentConfig::default(),
            context_manager(),
            Arc::new(StaticModelRegistry::default()),
            llm,
            tools.clone(),
            50,
        );
        engine.run_turn("please read a.rs", "system prompt", &[], &CancellationToken::new()).await.unwrap();
        assert_eq!(tools.calls.load(Ordering::SeqCst), 1);
        let completed = &engine.state().completed_turns[0];
        assert_eq!(completed.tool_calls.len(), 1);
        assert_eq!(completed.tool_results.len(), 1);
        assert_eq!(completed.agent_message, "done");
    }

    #[tokio::test]
    async fn tool_call_cap_exceeded_fails_turn_with_partial_results() {
        let always_tool_call = LlmResponse {
            content_parts: vec![],
            tool_calls: vec![ProposedToolCall { name: "search".to_string(), args: serde_json::json!({"q": "x"}) }],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::ToolCalls,
        };
        let responses: Vec<LlmResponse> = (0..30).map(|_| always_tool_call.clone()).collect();
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(responses) });
        let tools = Arc::new(EchoTool { calls: AtomicUsize::new(0) });
        let config = AgentConfig { tool_call_cap: 3, ..AgentConfig::default() };
        let mut engine = TurnEngine::new(config, context_manager(), Arc::new(StaticModelRegistry::default()), llm, tools, 50);

        let result = engine.run_turn("loop forever", "system prompt", &[], &CancellationToken::new()).await;
        assert!(matches!(result, Err(AgentError::ToolLoopCapExceeded { cap: 3 })));
        let failed = &engine.state().completed_turns[0];
        assert_eq!(failed.phase, TurnPhase::Failed);
        assert_eq!(failed.tool_results.len(), 3);
    }

    struct NameEchoTool;

    #[async_trait]
    impl ToolRuntime for NameEchoTool {
        async fn invoke(&self, name: &str, _args: &Value) -> ToolInvocationOutcome {
            ToolInvocationOutcome {
                response: serde_json::json!({ "from": name }),
                is_error: false,
            }
        }
    }

    #[tokio::test]
    async fn mixed_batch_preserves_call_order_in_recorded_results() {
        let batch_response = LlmResponse {
            content_parts: vec![],
            tool_calls: vec![
                ProposedToolCall { name: "read_file".to_string(), args: serde_json::json!({"path": "a.rs"}) },
                ProposedToolCall { name: "search_code".to_string(), args: serde_json::json!({"q": "x"}) },
                ProposedToolCall { name: "edit_file".to_string(), args: serde_json::json!({"path": "a.rs"}) },
                ProposedToolCall { name: "list_directory".to_string(), args: serde_json::json!({"path": "."}) },
            ],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::ToolCalls,
        };
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(vec![batch_response]) });
        let mut engine = TurnEngine::new(
            AgentConfig::default(),
            context_manager(),
            Arc::new(StaticModelRegistry::default()),
            llm,
            Arc::new(NameEchoTool),
            50,
        );

        engine.run_turn("read, search, edit, then list", "system prompt", &[], &CancellationToken::new()).await.unwrap();

        let completed = &engine.state().completed_turns[0];
        let recorded_names: Vec<&str> = completed.tool_results.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(recorded_names, vec!["read_file", "search_code", "edit_file", "list_directory"]);
        for result in &completed.tool_results {
            assert_eq!(result.raw_response["from"], result.tool_name);
        }
    }

    struct FailingReadTool;

    #[async_trait]
    impl ToolRuntime for FailingReadTool {
        async fn invoke(&self, _name: &str, _args: &Value) -> ToolInvocationOutcome {
            ToolInvocationOutcome {
                response: serde_json::json!({ "error": "error\n --> broken.rs:1:1\n" }),
                is_error: true,
            }
        }
    }

    #[tokio::test]
    async fn failing_tool_result_triggers_dynamic_expansion_into_snippets() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("broken.rs"), "fn broken() {}\n").await.unwrap();

        let tool_call_response = LlmResponse {
            content_parts: vec![],
            tool_calls: vec![ProposedToolCall { name: "read_file".to_string(), args: serde_json::json!({"path": "broken.rs"}) }],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::ToolCalls,
        };
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(vec![tool_call_response]) });
        let config = AgentConfig { workspace_root: dir.path().to_path_buf(), ..AgentConfig::default() };
        let mut engine = TurnEngine::new(
            config,
            context_manager(),
            Arc::new(StaticModelRegistry::default()),
            llm,
            Arc::new(FailingReadTool),
            50,
        );

        engine.run_turn("read broken.rs", "system prompt", &[], &CancellationToken::new()).await.unwrap();

        assert!(engine.state().snippets.iter().any(|s| s.path == PathBuf::from("broken.rs")));
    }

    #[tokio::test]
    async fn cancelled_token_fails_the_turn_as_cancelled_without_calling_the_llm() {
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(vec![]) });
        let tools = Arc::new(EchoTool { calls: AtomicUsize::new(0) });
        let mut engine = TurnEngine::new(
            AgentConfig::default(),
            context_manager(),
            Arc::new(StaticModelRegistry::default()),
            llm,
            tools,
            50,
        );
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = engine.run_turn("hello there", "system prompt", &[], &cancellation).await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
        let failed = &engine.state().completed_turns[0];
        assert_eq!(failed.phase, TurnPhase::Failed);
        assert_eq!(failed.error_info.as_ref().unwrap().code, "Core.Cancelled");
    }
}
