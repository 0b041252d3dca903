//! Tool System - deterministic units of work bound to task identifiers
//!
//! A `Tool` is invoked with a structured record and returns a structured
//! record or a `FailureCause`. A `ToolBinding` attaches a tool to a task with
//! its I/O contract and default limits; the `ToolRegistry` holds the current
//! binding per task.

mod binding;
mod catalog;
mod command;
mod func;
mod http;
mod registry;

pub use binding::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, ToolBinding};
pub use catalog::{CatalogDefaults, ToolCatalog};
pub use command::CommandTool;
pub use func::FnTool;
pub use http::HttpFetchTool;
pub use registry::{RegisterOutcome, TaskIds, ToolRegistry};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::FailureCause;

/// A deterministic unit of work
#[async_trait]
pub trait Tool: Send + Sync {
    /// Short name used as the default executable reference
    fn name(&self) -> &str;

    /// Invoke the tool. Dropping the returned future must stop the work.
    async fn invoke(&self, inputs: Value) -> Result<Value, FailureCause>;
}

/// Truncate to at most `max` characters, respecting char boundaries
pub(crate) fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
