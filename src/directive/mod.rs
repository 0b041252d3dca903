//! Directive store - one YAML document per task.
//!
//! Documents live at `<dir>/<task_id>.yaml` so operators can read, diff and
//! edit them by hand. Every read goes to disk; every write is serialized by a
//! per-task mutex, bumps the document revision, and lands via temp file +
//! rename so readers never observe a torn document. The mutex belongs to the
//! store instance: share one `DirectiveStore` per directory to keep appends
//! totally ordered.
//!
//! The learnings log is bounded inline: once a document holds more than
//! `max_learnings` entries the oldest move to `<task_id>.learnings.jsonl`.
//! Nothing is ever deleted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{Directive, LearningDraft, LearningEntry, LearningRef};
use crate::error::{DoeError, Result};
use crate::id::{temp_suffix, validate_task_id};
use crate::schema::Schema;
use crate::storage::JsonlStorage;

/// Directive store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectiveConfig {
    /// Learnings kept inline in the YAML document
    pub max_learnings: usize,
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self { max_learnings: 50 }
    }
}

/// Operator approval required for edits to a directive's contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub approved_by: String,
}

impl Approval {
    pub fn by(operator: impl Into<String>) -> Self {
        Self {
            approved_by: operator.into(),
        }
    }
}

/// Versioned, per-task-serialized store of directive documents
pub struct DirectiveStore {
    dir: PathBuf,
    archive: JsonlStorage,
    config: DirectiveConfig,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for DirectiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectiveStore")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock_err<E: std::fmt::Display>(e: E) -> DoeError {
    DoeError::Storage(e.to_string())
}

impl DirectiveStore {
    /// Open or create a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, config: DirectiveConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            archive: JsonlStorage::new(&dir)?,
            dir,
            config,
            locks: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the YAML document for a task
    pub fn document_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", task_id))
    }

    fn archive_collection(task_id: &str) -> String {
        format!("{}.learnings", task_id)
    }

    fn lock_for(&self, task_id: &str) -> Result<Arc<Mutex<()>>> {
        if let Some(lock) = self.locks.read().map_err(lock_err)?.get(task_id) {
            return Ok(Arc::clone(lock));
        }
        let mut locks = self.locks.write().map_err(lock_err)?;
        Ok(Arc::clone(locks.entry(task_id.to_string()).or_default()))
    }

    fn load(&self, task_id: &str) -> Result<Directive> {
        let path = self.document_path(task_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DoeError::NotFound(format!("directive {}", task_id)));
            }
            Err(e) => return Err(e.into()),
        };
        let directive: Directive = serde_yaml::from_str(&content)?;
        if directive.task_id != task_id {
            return Err(DoeError::Storage(format!(
                "{} declares task_id `{}`",
                path.display(),
                directive.task_id
            )));
        }
        Ok(directive)
    }

    fn write(&self, directive: &Directive) -> Result<()> {
        let path = self.document_path(&directive.task_id);
        let tmp = self
            .dir
            .join(format!(".{}.yaml.{}", directive.task_id, temp_suffix()));
        fs::write(&tmp, serde_yaml::to_string(directive)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Move the oldest inline learnings into the archive log.
    fn compact(&self, directive: &mut Directive) -> Result<()> {
        let overflow = directive.learnings.len().saturating_sub(self.config.max_learnings);
        if overflow == 0 {
            return Ok(());
        }
        let collection = Self::archive_collection(&directive.task_id);
        for entry in directive.learnings.drain(..overflow) {
            self.archive.append(&collection, &entry)?;
        }
        directive.archived_learnings += overflow as u64;
        debug!(task_id = %directive.task_id, archived = overflow, "Archived learnings");
        Ok(())
    }

    /// Get the current revision of a directive.
    pub fn get(&self, task_id: &str) -> Result<Directive> {
        validate_task_id(task_id)?;
        self.load(task_id)
    }

    /// Create a new directive. Its first stored revision is 1.
    pub fn create(&self, mut directive: Directive) -> Result<Directive> {
        validate_task_id(&directive.task_id)?;
        let lock = self.lock_for(&directive.task_id)?;
        let _guard = lock.lock().map_err(lock_err)?;

        if self.document_path(&directive.task_id).exists() {
            return Err(DoeError::AlreadyExists(format!("directive {}", directive.task_id)));
        }
        directive.revision = 1;
        self.write(&directive)?;
        info!(task_id = %directive.task_id, "Directive created");
        Ok(directive)
    }

    /// List task identifiers with a directive, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_task_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Append a learning, serialized against other writers of the same task.
    pub fn append_learning(&self, task_id: &str, draft: LearningDraft) -> Result<LearningRef> {
        self.append_inner(task_id, None, draft)
    }

    /// Append a learning only if the directive is still at `expected_revision`.
    ///
    /// Fails with `Conflict` for a stale writer; re-read and retry.
    pub fn compare_and_append(&self, task_id: &str, expected_revision: u64, draft: LearningDraft) -> Result<LearningRef> {
        self.append_inner(task_id, Some(expected_revision), draft)
    }

    fn append_inner(&self, task_id: &str, expected_revision: Option<u64>, draft: LearningDraft) -> Result<LearningRef> {
        validate_task_id(task_id)?;
        let lock = self.lock_for(task_id)?;
        let _guard = lock.lock().map_err(lock_err)?;

        let mut directive = self.load(task_id)?;
        check_revision(&directive, expected_revision)?;

        let sequence = directive.last_sequence + 1;
        directive.learnings.push(draft.into_entry(sequence));
        directive.last_sequence = sequence;
        directive.revision += 1;
        self.compact(&mut directive)?;
        self.write(&directive)?;

        info!(task_id, sequence, revision = directive.revision, "Learning appended");
        Ok(LearningRef {
            task_id: task_id.to_string(),
            sequence,
            revision: directive.revision,
        })
    }

    /// Replace a directive's input/output schema. Requires operator approval.
    pub fn revise_schema(
        &self,
        task_id: &str,
        expected_revision: u64,
        input_schema: Schema,
        output_schema: Schema,
        approval: Option<&Approval>,
    ) -> Result<Directive> {
        let approval = approval.ok_or_else(|| {
            DoeError::Unauthorized(format!("revising the schema of {} requires operator approval", task_id))
        })?;
        self.revise(task_id, expected_revision, |d| {
            d.input_schema = input_schema;
            d.output_schema = output_schema;
        })
        .inspect(|d| info!(task_id, revision = d.revision, approved_by = %approval.approved_by, "Schema revised"))
    }

    /// Replace a directive's edge-case notes. Requires operator approval.
    pub fn revise_edge_cases(
        &self,
        task_id: &str,
        expected_revision: u64,
        edge_cases: Vec<String>,
        approval: Option<&Approval>,
    ) -> Result<Directive> {
        let approval = approval.ok_or_else(|| {
            DoeError::Unauthorized(format!("revising the edge cases of {} requires operator approval", task_id))
        })?;
        self.revise(task_id, expected_revision, |d| d.edge_cases = edge_cases)
            .inspect(|d| info!(task_id, revision = d.revision, approved_by = %approval.approved_by, "Edge cases revised"))
    }

    fn revise<F: FnOnce(&mut Directive)>(&self, task_id: &str, expected_revision: u64, edit: F) -> Result<Directive> {
        validate_task_id(task_id)?;
        let lock = self.lock_for(task_id)?;
        let _guard = lock.lock().map_err(lock_err)?;

        let mut directive = self.load(task_id)?;
        check_revision(&directive, Some(expected_revision))?;
        edit(&mut directive);
        directive.revision += 1;
        self.write(&directive)?;
        Ok(directive)
    }

    /// Full learning history, archived entries first, ordered by sequence.
    pub fn learnings(&self, task_id: &str) -> Result<Vec<LearningEntry>> {
        let directive = self.get(task_id)?;
        let archived: Vec<LearningEntry> = self.archive.read_all(&Self::archive_collection(task_id))?;

        // A crash between archiving and rewriting the document can leave an
        // entry in both places
        let merged: BTreeMap<u64, LearningEntry> = archived
            .into_iter()
            .chain(directive.learnings)
            .map(|e| (e.sequence, e))
            .collect();
        Ok(merged.into_values().collect())
    }
}

fn check_revision(directive: &Directive, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != directive.revision => Err(DoeError::Conflict {
            task_id: directive.task_id.clone(),
            expected,
            actual: directive.revision,
        }),
        _ => Ok(()),
    }
}
