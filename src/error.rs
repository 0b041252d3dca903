//! Error types for doe
//!
//! Centralized error handling using thiserror. Tool failures are not errors:
//! they travel as `FailureCause` values inside an `ExecutionOutcome`.

use thiserror::Error;

/// All error types that can occur in doe
#[derive(Debug, Error)]
pub enum DoeError {
    /// Unknown task identifier (no directive or no tool binding)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A directive with this task identifier already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Task identifier is not usable as a document name
    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    /// Tool binding schema does not structurally match the directive
    #[error("Schema mismatch for {task_id}: {}", .problems.join("; "))]
    SchemaMismatch { task_id: String, problems: Vec<String> },

    /// Supplied inputs violate the bound input schema
    #[error("Input schema violation for {task_id}: {}", .violations.join("; "))]
    InputSchemaViolation { task_id: String, violations: Vec<String> },

    /// Directive mutation attempted without operator approval
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Writer held a stale revision
    #[error("Revision conflict on {task_id}: expected {expected}, found {actual}")]
    Conflict {
        task_id: String,
        expected: u64,
        actual: u64,
    },

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Tool construction or wiring error
    #[error("Tool error: {0}")]
    Tool(String),

    /// Tool catalog could not be read or parsed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Escalation has no operator decision yet
    #[error("Escalation awaiting decision: {0}")]
    Undecided(String),

    /// Caller cancelled the operation
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for doe operations
pub type Result<T> = std::result::Result<T, DoeError>;
