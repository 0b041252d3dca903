//! Escalation records for operator hand-off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::outcome::FailureCause;
use crate::id::generate_escalation_id;
use crate::storage::HasId;

/// Operator's answer to an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Resume execution with another attempt
    Retry,
    /// Give up; the run ends Failed and a learning is recorded
    Abort,
}

/// A run parked until an operator decides how to proceed.
///
/// Persisted before the orchestrator reports `Escalated`, so a decision can
/// resume the run even after a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: String,
    pub task_id: String,
    pub cause: FailureCause,
    /// Attempt number (1-based) that produced the cause
    pub attempt: u32,
    pub retries_used: u32,
    /// Inputs of the parked run, replayed on resume
    pub inputs: Value,
    pub created_at: DateTime<Utc>,

    pub decision: Option<Decision>,
    pub note: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Set when a decided escalation has been acted on
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
}

impl EscalationRecord {
    pub fn new(task_id: impl Into<String>, cause: FailureCause, attempt: u32, retries_used: u32, inputs: Value) -> Self {
        Self {
            id: generate_escalation_id(),
            task_id: task_id.into(),
            cause,
            attempt,
            retries_used,
            inputs,
            created_at: Utc::now(),
            decision: None,
            note: None,
            decided_by: None,
            decided_at: None,
            resumed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }

    /// The `{taskId, cause, attempt, timestamp}` notice sent to operators
    pub fn notice(&self) -> Value {
        serde_json::json!({
            "escalation_id": self.id,
            "task_id": self.task_id,
            "cause": self.cause,
            "attempt": self.attempt,
            "timestamp": self.created_at,
        })
    }
}

impl HasId for EscalationRecord {
    fn id(&self) -> &str {
        &self.id
    }
}
