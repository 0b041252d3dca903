//! Run state machine and per-run trace.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestrator run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Resolving,
    Validating,
    Executing,
    Classifying,
    Retrying,
    /// Parked until an operator decides
    Escalated,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, target),
            (Resolving, Validating)
                | (Resolving, Failed)
                | (Validating, Executing)
                | (Validating, Failed)
                | (Executing, Classifying)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Classifying, Retrying)
                | (Classifying, Escalated)
                | (Classifying, Failed)
                | (Retrying, Executing)
                | (Retrying, Failed)
                | (Escalated, Retrying)
                | (Escalated, Failed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Resolving => "resolving",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Classifying => "classifying",
            Self::Retrying => "retrying",
            Self::Escalated => "escalated",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened during one run: states visited, attempts, backoff sleeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTrace {
    states: Vec<RunState>,
    /// Tool invocations made
    pub attempts: u32,
    /// Backoff delays actually slept, in order
    pub backoffs: Vec<Duration>,
}

impl RunTrace {
    /// Trace of a fresh run
    pub fn new() -> Self {
        Self::starting_at(RunState::Resolving)
    }

    /// Trace of a run continuing from `state` (e.g. a resumed escalation)
    pub fn starting_at(state: RunState) -> Self {
        Self {
            states: vec![state],
            attempts: 0,
            backoffs: Vec::new(),
        }
    }

    pub fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Resolving)
    }

    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    /// Record a transition
    pub fn enter(&mut self, state: RunState) {
        debug_assert!(
            self.current().can_transition_to(state),
            "invalid run transition {} -> {}",
            self.current(),
            state
        );
        self.states.push(state);
    }
}

impl Default for RunTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut trace = RunTrace::new();
        trace.enter(RunState::Validating);
        trace.enter(RunState::Executing);
        trace.enter(RunState::Succeeded);
        assert_eq!(trace.current(), RunState::Succeeded);
        assert!(trace.current().is_terminal());
        assert_eq!(trace.states().len(), 4);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for target in [RunState::Executing, RunState::Retrying, RunState::Failed] {
            assert!(!RunState::Succeeded.can_transition_to(target));
            assert!(!RunState::Failed.can_transition_to(target));
        }
    }

    #[test]
    fn test_escalated_resumes_or_fails() {
        assert!(RunState::Escalated.can_transition_to(RunState::Retrying));
        assert!(RunState::Escalated.can_transition_to(RunState::Failed));
        assert!(!RunState::Escalated.can_transition_to(RunState::Executing));
        assert!(!RunState::Escalated.is_terminal());
    }

    #[test]
    fn test_validation_failure_skips_execution() {
        assert!(RunState::Validating.can_transition_to(RunState::Failed));
        assert!(!RunState::Validating.can_transition_to(RunState::Classifying));
    }
}
