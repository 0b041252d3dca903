//! Directive documents and their learnings log.
//!
//! A Directive is the human-editable description of a task: its goal, its
//! input/output contract, known edge cases, and the append-only record of
//! failures the system has learned from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::FailureCategory;
use crate::schema::Schema;

/// Structured document describing one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    //=== Identity ===
    /// Stable task identifier, also the document's file stem
    pub task_id: String,

    /// Bumped on every write; writers compare-and-swap against it
    #[serde(default)]
    pub revision: u64,

    //=== Description ===
    pub goal: String,

    #[serde(default)]
    pub input_schema: Schema,

    #[serde(default)]
    pub output_schema: Schema,

    #[serde(default)]
    pub edge_cases: Vec<String>,

    //=== Learnings ===
    /// Most recent learnings, oldest first
    #[serde(default)]
    pub learnings: Vec<LearningEntry>,

    /// Sequence number of the newest learning ever appended
    #[serde(default)]
    pub last_sequence: u64,

    /// Learnings moved out of this document into the archive log
    #[serde(default)]
    pub archived_learnings: u64,
}

impl Directive {
    /// Create a new directive at revision 0 with no learnings
    pub fn new(task_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            revision: 0,
            goal: goal.into(),
            input_schema: Schema::new(),
            output_schema: Schema::new(),
            edge_cases: Vec::new(),
            learnings: Vec::new(),
            last_sequence: 0,
            archived_learnings: 0,
        }
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_edge_case(mut self, note: impl Into<String>) -> Self {
        self.edge_cases.push(note.into());
        self
    }

    /// Total learnings ever recorded, inline and archived
    pub fn total_learnings(&self) -> u64 {
        self.archived_learnings + self.learnings.len() as u64
    }
}

/// One immutable entry of a directive's learnings log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    /// Monotonically increasing within the directive, starting at 1
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub category: FailureCategory,
    pub failure_summary: String,
    pub resolution: String,
    /// Tool revision that fixed (or is expected to fix) the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_revision: Option<String>,
}

/// Learning content before the store assigns sequence and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct LearningDraft {
    pub category: FailureCategory,
    pub failure_summary: String,
    pub resolution: String,
    pub tool_revision: Option<String>,
}

impl LearningDraft {
    pub fn new(
        category: FailureCategory,
        failure_summary: impl Into<String>,
        resolution: impl Into<String>,
    ) -> Self {
        Self {
            category,
            failure_summary: failure_summary.into(),
            resolution: resolution.into(),
            tool_revision: None,
        }
    }

    pub fn with_tool_revision(mut self, revision: impl Into<String>) -> Self {
        self.tool_revision = Some(revision.into());
        self
    }

    pub(crate) fn into_entry(self, sequence: u64) -> LearningEntry {
        LearningEntry {
            sequence,
            recorded_at: Utc::now(),
            category: self.category,
            failure_summary: self.failure_summary,
            resolution: self.resolution,
            tool_revision: self.tool_revision,
        }
    }
}

/// Pointer to a recorded learning, handed back to callers of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningRef {
    pub task_id: String,
    pub sequence: u64,
    /// Directive revision that contains the entry
    pub revision: u64,
}

impl std::fmt::Display for LearningRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{} (rev {})", self.task_id, self.sequence, self.revision)
    }
}
