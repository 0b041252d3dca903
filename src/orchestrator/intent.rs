//! Boundary to the external decision-maker.
//!
//! Whatever reads a free-text request hands back a task identifier and
//! nothing else; the orchestrator never looks at the request text.

use async_trait::async_trait;

use crate::error::Result;
use crate::id::validate_task_id;

/// Maps a free-text request to a task identifier
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve_intent(&self, request: &str) -> Result<String>;
}

/// Treats the trimmed request as the task identifier
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectResolver;

#[async_trait]
impl IntentResolver for DirectResolver {
    async fn resolve_intent(&self, request: &str) -> Result<String> {
        let task_id = request.trim();
        validate_task_id(task_id)?;
        Ok(task_id.to_string())
    }
}
