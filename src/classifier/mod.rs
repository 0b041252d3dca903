//! Failure classification - maps a `FailureCause` to a recovery action.
//!
//! The mapping is plain configuration: a category → action table with
//! per-task overrides. Categories missing from the table fall back to the
//! built-in defaults, so a partial config never leaves a hole.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{FailureCategory, FailureCause};

/// Configured response to a failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Retry,
    Escalate,
    Fail,
}

impl ActionKind {
    /// Built-in action for a category
    pub fn default_for(category: FailureCategory) -> Self {
        match category {
            FailureCategory::RateLimited | FailureCategory::Transient | FailureCategory::Timeout => Self::Retry,
            FailureCategory::InvalidInput | FailureCategory::Gone | FailureCategory::Cancelled => Self::Fail,
            FailureCategory::MeteredSpend
            | FailureCategory::OutputSchemaViolation
            | FailureCategory::Unknown => Self::Escalate,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Retry => "retry",
            Self::Escalate => "escalate",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// What the orchestrator should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry after backoff; `min_delay` raises the computed delay
    RetryWithBackoff { min_delay: Option<Duration> },
    /// Hand the failure to an operator
    EscalateToOperator,
    /// Stop; retrying cannot help
    PermanentFail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Category → action table
    pub rules: HashMap<FailureCategory, ActionKind>,
    /// Floor for rate-limit retry delays
    pub rate_limit_min_delay_ms: u64,
    /// Metered spend above this escalates; at or below it retries
    pub spend_threshold: f64,
    /// Per-task rule overrides
    pub overrides: HashMap<String, HashMap<FailureCategory, ActionKind>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: FailureCategory::ALL
                .iter()
                .map(|c| (*c, ActionKind::default_for(*c)))
                .collect(),
            rate_limit_min_delay_ms: 1000,
            spend_threshold: 0.0,
            overrides: HashMap::new(),
        }
    }
}

/// Applies a `ClassifierConfig` to failure causes
#[derive(Debug, Clone, Default)]
pub struct FailureClassifier {
    config: ClassifierConfig,
}

impl FailureClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Configured action for a category, after task overrides
    pub fn action_for(&self, task_id: &str, category: FailureCategory) -> ActionKind {
        self.config
            .overrides
            .get(task_id)
            .and_then(|rules| rules.get(&category))
            .or_else(|| self.config.rules.get(&category))
            .copied()
            .unwrap_or_else(|| ActionKind::default_for(category))
    }

    /// Full effective table for a task, in category order
    pub fn table(&self, task_id: &str) -> Vec<(FailureCategory, ActionKind)> {
        FailureCategory::ALL
            .iter()
            .map(|c| (*c, self.action_for(task_id, *c)))
            .collect()
    }

    /// Decide how to recover from `cause`
    pub fn classify(&self, task_id: &str, cause: &FailureCause) -> RecoveryAction {
        let mut kind = self.action_for(task_id, cause.category);

        if cause.category == FailureCategory::MeteredSpend
            && kind == ActionKind::Escalate
            && cause.estimated_cost.is_some_and(|cost| cost <= self.config.spend_threshold)
        {
            kind = ActionKind::Retry;
        }

        let action = match kind {
            ActionKind::Retry => RecoveryAction::RetryWithBackoff {
                min_delay: self.min_delay(cause),
            },
            ActionKind::Escalate => RecoveryAction::EscalateToOperator,
            ActionKind::Fail => RecoveryAction::PermanentFail,
        };
        debug!(task_id = %task_id, category = %cause.category, action = ?action, "Classified failure");
        action
    }

    fn min_delay(&self, cause: &FailureCause) -> Option<Duration> {
        let hint = cause.retry_after();
        if cause.category == FailureCategory::RateLimited {
            let floor = Duration::from_millis(self.config.rate_limit_min_delay_ms);
            Some(hint.map_or(floor, |h| h.max(floor)))
        } else {
            hint
        }
    }
}
