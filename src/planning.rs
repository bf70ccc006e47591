//! Planning Manager: heuristic classifier plus plan/feedback state.
//! Entirely disabled by configuration by default.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningState {
    Idle,
    AwaitingApproval,
    ExecutingPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningDecision {
    StayIdle,
    ProposePlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackClassification {
    Approve,
    Revision,
    NewRequest,
}

static SIMPLE_EXPLORATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)read\s+.*file").unwrap(),
        Regex::new(r"(?i)show\s+.*file").unwrap(),
        Regex::new(r"(?i)list\s+.*").unwrap(),
        Regex::new(r"(?i)check\s+status").unwrap(),
    ]
});

static COMPLEX_IMPLEMENTATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)implement\s+and").unwrap(),
        Regex::new(r"(?i)refactor\s+entire").unwrap(),
        Regex::new(r"(?i)migrate\s+from").unwrap(),
        Regex::new(r"(?i)design\s+a\s+new").unwrap(),
    ]
});

static MULTI_STEP_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\bthen\b").unwrap(),
        Regex::new(r"(?i)\band then\b").unwrap(),
        Regex::new(r"(?i)\bafter\b").unwrap(),
        Regex::new(r"(?i)\bfinally\b").unwrap(),
        Regex::new(r"(?m)^\s*\d+[.)]\s").unwrap(),
    ]
});

static ACTION_VERBS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\bimplement\b").unwrap(),
        Regex::new(r"(?i)\brefactor\b").unwrap(),
        Regex::new(r"(?i)\bbuild\b").unwrap(),
        Regex::new(r"(?i)\bcreate\b").unwrap(),
        Regex::new(r"(?i)\bdeploy\b").unwrap(),
        Regex::new(r"(?i)\bmigrate\b").unwrap(),
    ]
});

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

/// Classifies a user message at `Idle`.
pub fn classify_request(user_text: &str) -> PlanningDecision {
    if any_match(&SIMPLE_EXPLORATION_PATTERNS, user_text) {
        return PlanningDecision::StayIdle;
    }
    if any_match(&COMPLEX_IMPLEMENTATION_PATTERNS, user_text) {
        return PlanningDecision::ProposePlan;
    }
    let has_multi_step = any_match(&MULTI_STEP_INDICATORS, user_text);
    let has_action_verb = any_match(&ACTION_VERBS, user_text);
    if has_multi_step && has_action_verb {
        PlanningDecision::ProposePlan
    } else {
        PlanningDecision::StayIdle
    }
}

/// Classifies the user's reply to a proposed plan. `revision_cycles` is
/// the number of prior revision classifications this plan has already
/// received; ambiguity resolves to "new request" after two cycles (spec
/// §4.7 / §9 open question).
pub fn classify_feedback(reply: &str, revision_cycles: u32) -> FeedbackClassification {
    let trimmed = reply.trim();
    if trimmed.eq_ignore_ascii_case("approve") {
        return FeedbackClassification::Approve;
    }

    if trimmed.len() < 3 {
        return FeedbackClassification::NewRequest;
    }

    if revision_cycles >= 2 {
        debug!(revision_cycles, "ambiguous feedback after two revision cycles, escalating to new request");
        return FeedbackClassification::NewRequest;
    }

    // Any other substantive text is treated as a revision request;
    // genuinely off-topic text (very short or clearly unrelated to
    // planning vocabulary) is treated as a new request instead.
    let planning_vocab = ["plan", "step", "instead", "change", "shorten", "add", "remove", "keep", "skip"];
    let mentions_planning_vocab = planning_vocab.iter().any(|w| trimmed.to_ascii_lowercase().contains(w));
    if mentions_planning_vocab || trimmed.len() > 10 {
        FeedbackClassification::Revision
    } else {
        FeedbackClassification::NewRequest
    }
}

/// Tracks the planning conversation's small state machine across turns.
pub struct PlanningManager {
    enabled: bool,
    state: PlanningState,
    revision_cycles: u32,
    pub proposed_plan: Option<String>,
}

impl PlanningManager {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: PlanningState::Idle,
            revision_cycles: 0,
            proposed_plan: None,
        }
    }

    pub fn state(&self) -> PlanningState {
        self.state
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Called at `Idle` with a fresh user message. Returns `true` if the
    /// engine should intercept (run the planning sub-loop) instead of
    /// handing the message straight to the turn engine.
    pub fn should_intercept(&mut self, user_text: &str) -> bool {
        if !self.enabled || self.state != PlanningState::Idle {
            return false;
        }
        matches!(classify_request(user_text), PlanningDecision::ProposePlan)
    }

    pub fn propose(&mut self, plan_text: String) {
        self.proposed_plan = Some(plan_text);
        self.state = PlanningState::AwaitingApproval;
    }

    /// Processes the user's reply while `AwaitingApproval`. Returns the
    /// classification so the turn engine can decide what to do next.
    pub fn handle_feedback(&mut self, reply: &str) -> FeedbackClassification {
        debug_assert_eq!(self.state, PlanningState::AwaitingApproval);
        let classification = classify_feedback(reply, self.revision_cycles);
        match classification {
            FeedbackClassification::Approve => {
                self.state = PlanningState::ExecutingPlan;
                self.revision_cycles = 0;
            }
            FeedbackClassification::Revision => {
                self.revision_cycles += 1;
            }
            FeedbackClassification::NewRequest => {
                self.state = PlanningState::Idle;
                self.proposed_plan = None;
                self.revision_cycles = 0;
            }
        }
        classification
    }

    pub fn finish_execution(&mut self) {
        self.state = PlanningState::Idle;
        self.proposed_plan = None;
        self.revision_cycles = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_exploration_stays_idle() {
        assert_eq!(
            classify_request("read the file README.md and tell me what it says."),
            PlanningDecision::StayIdle
        );
    }

    #[test]
    fn complex_request_proposes_plan() {
        assert_eq!(
            classify_request("implement a caching layer for the context manager and then add tests for it."),
            PlanningDecision::ProposePlan
        );
    }

    #[test]
    fn multi_step_plus_action_verb_proposes_plan() {
        assert_eq!(
            classify_request("first build the client, then create the server."),
            PlanningDecision::ProposePlan
        );
    }

    #[test]
    fn multi_step_alone_stays_idle() {
        assert_eq!(classify_request("after lunch, then dinner."), PlanningDecision::StayIdle);
    }

    #[test]
    fn literal_approve_approves() {
        assert_eq!(classify_feedback("approve", 0), FeedbackClassification::Approve);
        assert_eq!(classify_feedback("Approve", 0), FeedbackClassification::Approve);
    }

    #[test]
    fn ambiguous_feedback_escalates_after_two_cycles() {
        assert_eq!(classify_feedback("hmm maybe", 2), FeedbackClassification::NewRequest);
    }

    #[test]
    fn manager_full_cycle() {
        let mut mgr = PlanningManager::new(true);
        assert!(mgr.should_intercept("implement and then deploy the new pipeline"));
        mgr.propose("1. do x\n2. do y".to_string());
        assert_eq!(mgr.state(), PlanningState::AwaitingApproval);
        let classification = mgr.handle_feedback("approve");
        assert_eq!(classification, FeedbackClassification::Approve);
        assert_eq!(mgr.state(), PlanningState::ExecutingPlan);
    }

    #[test]
    fn disabled_never_intercepts() {
        let mut mgr = PlanningManager::new(false);
        assert!(!mgr.should_intercept("implement and then deploy the new pipeline"));
    }
}
