//! Tool bindings - a tool attached to a task with its contract and limits.

use std::sync::Arc;
use std::time::Duration;

use super::Tool;
use crate::domain::Directive;
use crate::schema::Schema;

/// Default per-attempt timeout for a binding
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retry budget for a binding
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A tool registered against a task identifier
#[derive(Clone)]
pub struct ToolBinding {
    /// Task identifier, same namespace as directives
    pub task_id: String,
    /// Executable reference (e.g. "command:python3 execution/summarize_url.py")
    pub reference: String,
    /// Tool revision label, cited by learnings that a revision fixed
    pub revision: Option<String>,
    pub input_schema: Schema,
    pub output_schema: Schema,
    /// Default per-attempt timeout
    pub timeout: Duration,
    /// Default retry budget
    pub max_retries: u32,
    tool: Arc<dyn Tool>,
}

impl std::fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBinding")
            .field("task_id", &self.task_id)
            .field("reference", &self.reference)
            .field("revision", &self.revision)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ToolBinding {
    /// Bind a tool to a task with default limits and empty schemas
    pub fn new(task_id: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            task_id: task_id.into(),
            reference: tool.name().to_string(),
            revision: None,
            input_schema: Schema::new(),
            output_schema: Schema::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            tool,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    /// Two bindings are identical when everything but the tool handle matches
    pub fn same_as(&self, other: &ToolBinding) -> bool {
        self.task_id == other.task_id
            && self.reference == other.reference
            && self.revision == other.revision
            && self.input_schema == other.input_schema
            && self.output_schema == other.output_schema
            && self.timeout == other.timeout
            && self.max_retries == other.max_retries
    }

    /// Structural mismatches between this binding and a directive's contract
    pub fn schema_problems(&self, directive: &Directive) -> Vec<String> {
        let mut problems = Schema::input_problems(&directive.input_schema, &self.input_schema);
        problems.extend(Schema::output_problems(&directive.output_schema, &self.output_schema));
        problems
    }
}
