//! Event record types for observability.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::directive::LearningRef;
use super::escalation::EscalationRecord;
use super::outcome::FailureCause;
use crate::id::{generate_event_id, now_ms};

/// Event type constants
pub mod event_types {
    pub const RUN_SUCCEEDED: &str = "run.succeeded";
    pub const RUN_FAILED: &str = "run.failed";
    pub const RUN_ESCALATED: &str = "run.escalated";
    pub const LEARNING_RECORDED: &str = "learning.recorded";
    pub const REVISION_REQUESTED: &str = "revision.requested";
}

/// Structured event handed to the observability sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    /// Unique event identifier
    pub id: String,
    /// Event type (e.g., "run.succeeded", "learning.recorded")
    pub event_type: String,
    /// Task the event concerns
    pub task_id: String,
    /// Event-specific payload data
    pub payload: Value,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl EventRecord {
    /// Create a new event with the given type and payload
    pub fn new(event_type: &str, task_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.to_string(),
            task_id: task_id.into(),
            payload,
            created_at: now_ms(),
        }
    }

    /// Create a run.succeeded event
    pub fn run_succeeded(task_id: &str, attempts: u32, retries_used: u32) -> Self {
        Self::new(
            event_types::RUN_SUCCEEDED,
            task_id,
            serde_json::json!({ "attempts": attempts, "retries_used": retries_used }),
        )
    }

    /// Create a run.failed event
    pub fn run_failed(task_id: &str, cause: &FailureCause, attempts: u32, learning: Option<&LearningRef>) -> Self {
        Self::new(
            event_types::RUN_FAILED,
            task_id,
            serde_json::json!({
                "cause": cause,
                "attempts": attempts,
                "learning": learning,
            }),
        )
    }

    /// Create a run.failed event for a run rejected before any attempt
    /// (`reason` is `schema_mismatch` or `input_schema_violation`)
    pub fn run_rejected(task_id: &str, reason: &str, problems: &[String]) -> Self {
        Self::new(
            event_types::RUN_FAILED,
            task_id,
            serde_json::json!({
                "rejected": reason,
                "problems": problems,
                "attempts": 0,
                "learning": null,
            }),
        )
    }

    /// Create a run.escalated event carrying the operator notice
    pub fn run_escalated(record: &EscalationRecord) -> Self {
        Self::new(event_types::RUN_ESCALATED, record.task_id.as_str(), record.notice())
    }

    /// Create a learning.recorded event
    pub fn learning_recorded(learning: &LearningRef, summary: &str) -> Self {
        Self::new(
            event_types::LEARNING_RECORDED,
            learning.task_id.as_str(),
            serde_json::json!({
                "sequence": learning.sequence,
                "revision": learning.revision,
                "summary": summary,
            }),
        )
    }

    /// Create a revision.requested event for the external decision-maker
    pub fn revision_requested(learning: &LearningRef, reason: &str) -> Self {
        Self::new(
            event_types::REVISION_REQUESTED,
            learning.task_id.as_str(),
            serde_json::json!({
                "learning_sequence": learning.sequence,
                "reason": reason,
            }),
        )
    }

    /// Check if this event reports a terminal run outcome
    pub fn is_terminal(&self) -> bool {
        self.event_type.starts_with("run.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_record_new() {
        let event = EventRecord::new("test.event", "fetch-summary", Value::Null);
        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.task_id, "fetch-summary");
        assert!(event.created_at > 0);
    }

    #[test]
    fn test_run_events_are_terminal() {
        let cause = FailureCause::transient("reset");
        assert!(EventRecord::run_succeeded("t", 1, 0).is_terminal());
        assert!(EventRecord::run_failed("t", &cause, 4, None).is_terminal());
        let record = EscalationRecord::new("t", cause, 2, 1, Value::Null);
        assert!(EventRecord::run_escalated(&record).is_terminal());
        assert!(EventRecord::run_rejected("t", "input_schema_violation", &[]).is_terminal());
    }

    #[test]
    fn test_run_escalated_carries_notice() {
        let record = EscalationRecord::new("t", FailureCause::unknown("odd"), 2, 1, Value::Null);
        let event = EventRecord::run_escalated(&record);
        assert_eq!(event.task_id, "t");
        assert_eq!(event.payload["escalation_id"], record.id.as_str());
        assert_eq!(event.payload["attempt"], 2);
        assert!(event.payload["timestamp"].is_string());
    }

    #[test]
    fn test_run_rejected_payload() {
        let problems = vec!["missing required field `url`".to_string()];
        let event = EventRecord::run_rejected("t", "input_schema_violation", &problems);
        assert_eq!(event.event_type, event_types::RUN_FAILED);
        assert_eq!(event.payload["rejected"], "input_schema_violation");
        assert_eq!(event.payload["problems"][0], "missing required field `url`");
        assert_eq!(event.payload["attempts"], 0);
        assert!(event.payload["learning"].is_null());
    }

    #[test]
    fn test_learning_events_are_not_terminal() {
        let learning = LearningRef {
            task_id: "t".into(),
            sequence: 1,
            revision: 1,
        };
        assert!(!EventRecord::learning_recorded(&learning, "x").is_terminal());
        assert!(!EventRecord::revision_requested(&learning, "x").is_terminal());
    }

    #[test]
    fn test_run_failed_payload() {
        let learning = LearningRef {
            task_id: "t".into(),
            sequence: 3,
            revision: 9,
        };
        let event = EventRecord::run_failed("t", &FailureCause::gone("410"), 1, Some(&learning));
        assert_eq!(event.payload["cause"]["category"], "gone");
        assert_eq!(event.payload["learning"]["sequence"], 3);
    }
}
