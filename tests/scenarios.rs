//! Integration tests for scenarios S1-S4. S5 and S6 are covered as unit
//! tests alongside `ContextManager::assemble` itself
//! (`src/context/mod.rs`), since they exercise assembly directly without
//! needing the full turn loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agent_turn_engine::cancellation::CancellationToken;
use agent_turn_engine::config::{AgentConfig, ContextTargets, RetryConfig, StaticModelRegistry};
use agent_turn_engine::context::ContextManager;
use agent_turn_engine::data_model::ToolSchema;
use agent_turn_engine::error::AgentError;
use agent_turn_engine::interfaces::{
    AgentEvent, FinishReason, LlmProvider, LlmResponse, ProposedToolCall, ToolInvocationOutcome, ToolRuntime, TokenUsage,
};
use agent_turn_engine::planning::PlanningState;
use agent_turn_engine::summarizer::Summarizer;
use agent_turn_engine::token::{CalibratedTokenEstimator, TokenCounter};
use agent_turn_engine::turn_engine::TurnEngine;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

/// Installs a `tracing` subscriber honoring `RUST_LOG`, scaled down for
/// test output: every scenario test calls this first so
/// `RUST_LOG=agent_turn_engine=debug cargo test` surfaces the turn
/// engine's structured logs.
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn context_manager() -> ContextManager {
    init_test_logging();
    ContextManager::new(TokenCounter::new(Arc::new(CalibratedTokenEstimator::default())), Summarizer::default())
}

fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_delay_secs: 0.01,
        cap_secs: 0.05,
        jitter: 0.0,
    }
}

struct NoopTool;

#[async_trait]
impl ToolRuntime for NoopTool {
    async fn invoke(&self, _name: &str, _args: &serde_json::Value) -> ToolInvocationOutcome {
        ToolInvocationOutcome {
            response: serde_json::json!({ "content": "# Hello\nThis project does X." }),
            is_error: false,
        }
    }
}

/// S1: a single read-file tool call, then a final answer, with planning
/// enabled but never triggered (the request is a simple exploration).
#[tokio::test]
async fn s1_simple_exploration_bypasses_planning() {
    struct ReadThenAnswer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ReadThenAnswer {
        async fn invoke(&self, _payload: &agent_turn_engine::data_model::PromptPayload) -> Result<LlmResponse, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(LlmResponse {
                    content_parts: vec![],
                    tool_calls: vec![ProposedToolCall {
                        name: "read_file".to_string(),
                        args: serde_json::json!({ "path": "README.md" }),
                    }],
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::ToolCalls,
                })
            } else {
                Ok(LlmResponse {
                    content_parts: vec!["The README says: Hello, this project does X.".to_string()],
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::Stop,
                })
            }
        }
    }

    let config = AgentConfig { planning_enabled: true, ..AgentConfig::default() };
    let mut engine = TurnEngine::new(
        config,
        context_manager(),
        Arc::new(StaticModelRegistry::default()),
        Arc::new(ReadThenAnswer { calls: AtomicUsize::new(0) }),
        Arc::new(NoopTool),
        50,
    );

    engine
        .run_turn(
            "read the file README.md and tell me what it says.",
            "system",
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(engine.planning_state(), PlanningState::Idle);
    let turn = &engine.state().completed_turns[0];
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].name, "read_file");
    assert!(turn.agent_message.contains("Hello"));
}

/// S2: a complex request proposes a plan; approving it injects the plan
/// text as a key decision, which the next assembly surfaces verbatim.
#[tokio::test]
async fn s2_complex_request_triggers_plan_and_approval_injects_it() {
    struct PlanThenAnswer;

    #[async_trait]
    impl LlmProvider for PlanThenAnswer {
        async fn invoke(&self, payload: &agent_turn_engine::data_model::PromptPayload) -> Result<LlmResponse, AgentError> {
            // The planning-only call passes no tool schemas; the post-approval
            // call does (possibly empty too, but distinguished by tool_schemas
            // being absent is not reliable here, so key off tool_schemas len
            // only when non-planning calls pass some in other tests). For this
            // scenario both calls have empty tool schemas, so respond based on
            // whether the user text itself looks like the original request or
            // looks like the approval reply by returning a plan the first time
            // and a final answer after that.
            let _ = payload;
            Ok(LlmResponse {
                content_parts: vec!["1. add a cache struct\n2. wire it into the context manager\n3. add tests".to_string()],
                tool_calls: vec![],
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    let config = AgentConfig { planning_enabled: true, ..AgentConfig::default() };
    let mut engine = TurnEngine::new(
        config,
        context_manager(),
        Arc::new(StaticModelRegistry::default()),
        Arc::new(PlanThenAnswer),
        Arc::new(NoopTool),
        50,
    );

    engine
        .run_turn(
            "implement a caching layer for the context manager and then add tests for it.",
            "system",
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(engine.planning_state(), PlanningState::AwaitingApproval);

    engine
        .run_turn("approve", "system", &[], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(engine.planning_state(), PlanningState::Idle);

    let plan_text = "approved plan: 1. add a cache struct\n2. wire it into the context manager\n3. add tests";
    assert!(engine.state().key_decisions.iter().any(|d| d == plan_text));

    // The next assembly surfaces the approved plan verbatim in its
    // key-decisions bullet block.
    let manager = context_manager();
    let model = StaticModelRegistry::default();
    let model_info = {
        use agent_turn_engine::config::ModelRegistry;
        model.lookup("default-model")
    };
    let assembly = manager
        .assemble(
            engine.state(),
            model_info,
            &AgentConfig::default(),
            ContextTargets::default(),
            "system",
            &[] as &[ToolSchema],
            "anything",
        )
        .unwrap();
    let has_plan = assembly
        .payload
        .messages
        .iter()
        .any(|m| m.content.contains("add a cache struct"));
    assert!(has_plan, "expected the approved plan text in the next assembly");
}

/// S3: two rate-limit failures then success; three attempts total.
#[tokio::test]
async fn s3_rate_limit_retry_with_context_reduction_then_success() {
    struct FlakyThenOk {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FlakyThenOk {
        async fn invoke(&self, _payload: &agent_turn_engine::data_model::PromptPayload) -> Result<LlmResponse, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < 2 {
                Err(AgentError::LlmRateLimit { attempts: call as u32 + 1 })
            } else {
                Ok(LlmResponse {
                    content_parts: vec!["recovered".to_string()],
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::Stop,
                })
            }
        }
    }

    let llm = Arc::new(FlakyThenOk { calls: AtomicUsize::new(0) });
    let config = AgentConfig { retry: fast_retry_config(), ..AgentConfig::default() };
    let mut engine = TurnEngine::new(
        config,
        context_manager(),
        Arc::new(StaticModelRegistry::default()),
        llm.clone(),
        Arc::new(NoopTool),
        50,
    );

    engine
        .run_turn("please help", "system", &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.state().completed_turns[0].agent_message, "recovered");
}

/// S4: a tool-call cap of 25 fails the turn after the 25th recorded call,
/// retaining exactly 25 partial tool results.
#[tokio::test]
async fn s4_tool_call_cap_enforcement() {
    struct AlwaysOneToolCall;

    #[async_trait]
    impl LlmProvider for AlwaysOneToolCall {
        async fn invoke(&self, _payload: &agent_turn_engine::data_model::PromptPayload) -> Result<LlmResponse, AgentError> {
            Ok(LlmResponse {
                content_parts: vec![],
                tool_calls: vec![ProposedToolCall { name: "search".to_string(), args: serde_json::json!({ "q": "x" }) }],
                usage: TokenUsage::default(),
                finish_reason: FinishReason::ToolCalls,
            })
        }
    }

    let config = AgentConfig { tool_call_cap: 25, ..AgentConfig::default() };
    let mut engine = TurnEngine::new(
        config,
        context_manager(),
        Arc::new(StaticModelRegistry::default()),
        Arc::new(AlwaysOneToolCall),
        Arc::new(NoopTool),
        50,
    );

    let result = engine
        .run_turn("loop forever please", "system", &[], &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AgentError::ToolLoopCapExceeded { cap: 25 })));

    let failed = &engine.state().completed_turns[0];
    assert_eq!(failed.phase, agent_turn_engine::data_model::TurnPhase::Failed);
    assert_eq!(failed.tool_results.len(), 25);
}

/// The event sink receives one AgentMessage per completed turn, confirming
/// the unified event stream is actually wired through the turn engine
/// rather than only logged.
#[tokio::test]
async fn event_sink_observes_agent_message_on_completion() {
    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        async fn invoke(&self, _payload: &agent_turn_engine::data_model::PromptPayload) -> Result<LlmResponse, AgentError> {
            Ok(LlmResponse {
                content_parts: vec!["hi".to_string()],
                tool_calls: vec![],
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut engine = TurnEngine::new(
        AgentConfig::default(),
        context_manager(),
        Arc::new(StaticModelRegistry::default()),
        Arc::new(Echo),
        Arc::new(NoopTool),
        50,
    )
    .with_event_sink(tx);

    engine
        .run_turn("hello", "system", &[], &CancellationToken::new())
        .await
        .unwrap();
    drop(engine);

    let mut saw_agent_message = false;
    while let Some(event) = rx.recv().await {
        if let AgentEvent::AgentMessage { text, .. } = event {
            assert_eq!(text, "hi");
            saw_agent_message = true;
        }
    }
    assert!(saw_agent_message);
}
