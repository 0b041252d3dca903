//! Tool registry - current binding per task identifier.
//!
//! Each task has its own slot; registration locks only that slot, so writers
//! for different tasks never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use super::binding::ToolBinding;
use crate::directive::DirectiveStore;
use crate::error::{DoeError, Result};
use crate::id::validate_task_id;

type Slot = Arc<Mutex<Option<Arc<ToolBinding>>>>;

/// What `register` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First binding for this task
    Added,
    /// Identical binding already registered; nothing changed
    Unchanged,
    /// A different binding was superseded
    Replaced,
}

/// Snapshot of registered task identifiers.
///
/// Finite and restartable: iterate it as many times as needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskIds(Arc<[String]>);

impl TaskIds {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.0.iter().any(|id| id == task_id)
    }
}

impl<'a> IntoIterator for &'a TaskIds {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Registry of tool bindings, checked against directives at bind time
pub struct ToolRegistry {
    directives: Arc<DirectiveStore>,
    slots: RwLock<HashMap<String, Slot>>,
}

fn lock_err<E: std::fmt::Display>(e: E) -> DoeError {
    DoeError::Storage(e.to_string())
}

impl ToolRegistry {
    pub fn new(directives: Arc<DirectiveStore>) -> Self {
        Self {
            directives,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, task_id: &str) -> Result<Slot> {
        if let Some(slot) = self.slots.read().map_err(lock_err)?.get(task_id) {
            return Ok(Arc::clone(slot));
        }
        let mut slots = self.slots.write().map_err(lock_err)?;
        Ok(Arc::clone(slots.entry(task_id.to_string()).or_default()))
    }

    /// Register or replace the binding for `binding.task_id`.
    ///
    /// Fails with `SchemaMismatch` when a directive exists for the task and
    /// the binding's schemas do not structurally match it.
    pub fn register(&self, binding: ToolBinding) -> Result<RegisterOutcome> {
        let task_id = binding.task_id.clone();
        validate_task_id(&task_id)?;

        let slot = self.slot(&task_id)?;
        let mut current = slot.lock().map_err(lock_err)?;

        if current.as_ref().is_some_and(|existing| existing.same_as(&binding)) {
            debug!(task_id = %task_id, "Identical binding already registered");
            return Ok(RegisterOutcome::Unchanged);
        }

        match self.directives.get(&task_id) {
            Ok(directive) => {
                let problems = binding.schema_problems(&directive);
                if !problems.is_empty() {
                    return Err(DoeError::SchemaMismatch { task_id, problems });
                }
            }
            Err(DoeError::NotFound(_)) => {
                debug!(task_id = %task_id, "No directive yet; skipping schema check");
            }
            Err(e) => return Err(e),
        }

        let outcome = match current.replace(Arc::new(binding)) {
            None => RegisterOutcome::Added,
            Some(previous) => {
                info!(
                    task_id = %task_id,
                    previous_reference = %previous.reference,
                    previous_revision = ?previous.revision,
                    "Tool binding replaced"
                );
                RegisterOutcome::Replaced
            }
        };
        Ok(outcome)
    }

    /// Current binding for a task
    pub fn lookup(&self, task_id: &str) -> Result<Arc<ToolBinding>> {
        let slot = self
            .slots
            .read()
            .map_err(lock_err)?
            .get(task_id)
            .cloned()
            .ok_or_else(|| DoeError::NotFound(format!("tool binding {}", task_id)))?;
        let binding = slot.lock().map_err(lock_err)?.clone();
        binding.ok_or_else(|| DoeError::NotFound(format!("tool binding {}", task_id)))
    }

    /// Task identifiers with a binding, sorted
    pub fn list(&self) -> Result<TaskIds> {
        let slots = self.slots.read().map_err(lock_err)?;
        let mut ids = Vec::with_capacity(slots.len());
        for (task_id, slot) in slots.iter() {
            if slot.lock().map_err(lock_err)?.is_some() {
                ids.push(task_id.clone());
            }
        }
        ids.sort();
        Ok(TaskIds(ids.into()))
    }
}
