//! Annealer - turns terminal failures into directive learnings.
//!
//! Called only on paths that end `Failed`: retry budget exhausted, a
//! non-retryable cause, or an operator aborting an escalation. Each entry
//! pairs what went wrong with what should change, and a `revision.requested`
//! event asks the decision-maker to revise the tool or directive.

use std::sync::Arc;

use tracing::{info, warn};

use crate::directive::DirectiveStore;
use crate::domain::{EventRecord, FailureCategory, FailureCause, LearningDraft, LearningRef};
use crate::error::Result;
use crate::observability::EventSink;

/// How a failed run reached `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePath {
    /// Retryable cause, budget spent
    Exhausted,
    /// Classifier said retrying cannot help
    NonRetryable,
    /// Operator aborted an escalated run
    OperatorAbort {
        note: Option<String>,
        decided_by: Option<String>,
    },
}

pub struct Annealer {
    directives: Arc<DirectiveStore>,
    sink: Arc<dyn EventSink>,
}

impl Annealer {
    pub fn new(directives: Arc<DirectiveStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { directives, sink }
    }

    /// Append a learning and signal that a revision is wanted
    pub fn record(
        &self,
        task_id: &str,
        category: FailureCategory,
        failure_summary: &str,
        resolution: &str,
        tool_revision: Option<&str>,
    ) -> Result<LearningRef> {
        let mut draft = LearningDraft::new(category, failure_summary, resolution);
        if let Some(revision) = tool_revision {
            draft = draft.with_tool_revision(revision);
        }
        let learning = self.directives.append_learning(task_id, draft)?;
        info!(task_id, sequence = learning.sequence, category = %category, "Learning recorded");

        self.emit(&EventRecord::learning_recorded(&learning, failure_summary));
        self.emit(&EventRecord::revision_requested(&learning, resolution));
        Ok(learning)
    }

    /// Record a learning for a failed run, composing its text from the cause
    pub fn record_failure(
        &self,
        task_id: &str,
        cause: &FailureCause,
        attempts: u32,
        path: &FailurePath,
        tool_revision: Option<&str>,
    ) -> Result<LearningRef> {
        let summary = failure_summary(cause, attempts);
        let resolution = resolution_text(cause, path);
        self.record(task_id, cause.category, &summary, &resolution, tool_revision)
    }

    fn emit(&self, event: &EventRecord) {
        if let Err(e) = self.sink.emit(event) {
            warn!(event_type = %event.event_type, error = %e, "Failed to emit event");
        }
    }
}

fn failure_summary(cause: &FailureCause, attempts: u32) -> String {
    let plural = if attempts == 1 { "" } else { "s" };
    format!("{} after {} attempt{}", cause, attempts, plural)
}

fn resolution_text(cause: &FailureCause, path: &FailurePath) -> String {
    match path {
        FailurePath::OperatorAbort { note, decided_by } => {
            let who = decided_by.as_deref().unwrap_or("operator");
            match note {
                Some(note) => format!("Aborted by {}: {}", who, note),
                None => format!("Aborted by {} without a note; revise before re-running", who),
            }
        }
        FailurePath::Exhausted => match cause.category {
            FailureCategory::RateLimited => {
                "Still rate limited after all retries; raise the retry budget or backoff, or throttle callers".into()
            }
            FailureCategory::Timeout => "Tool kept timing out; raise the timeout or make the tool faster".into(),
            _ => "Retry budget exhausted; tool needs revision to handle this failure".into(),
        },
        FailurePath::NonRetryable => match cause.category {
            FailureCategory::InvalidInput => "Inputs rejected by the tool; tighten the directive's input schema".into(),
            FailureCategory::Gone => "Resource permanently unavailable; update the directive's edge cases".into(),
            _ => "Non-retryable failure; revise the tool or directive before re-running".into(),
        },
    }
}
