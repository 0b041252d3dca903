//! Durable operator escalation queue.
//!
//! Escalations are JSONL records, written before the orchestrator reports
//! `Escalated`. A decision written by any process (the CLI, a webhook
//! handler) is picked up by waiters here, either through the in-process
//! notify or by polling the file.
//!
//! `decide` and `claim` re-read the file before writing, so a second process
//! that comes along later sees the first one's decision or claim. Two
//! processes claiming the same escalation at the same instant are not
//! serialized: there is no cross-process file lock, so run one resumer per
//! escalation.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Decision, EscalationRecord};
use crate::error::{DoeError, Result};
use crate::storage::{Filter, JsonlStorage, Storage};

const COLLECTION: &str = "escalations";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// How often waiters re-read the queue for out-of-process decisions
    pub poll_interval_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 500 }
    }
}

pub struct EscalationQueue {
    storage: JsonlStorage,
    poll_interval: Duration,
    decided: Notify,
}

impl EscalationQueue {
    pub fn open(dir: impl AsRef<Path>, config: &EscalationConfig) -> Result<Self> {
        Ok(Self {
            storage: JsonlStorage::new(dir)?,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            decided: Notify::new(),
        })
    }

    /// Persist a new escalation
    pub fn open_escalation(&self, record: &EscalationRecord) -> Result<()> {
        self.storage.create(COLLECTION, record)?;
        warn!(
            escalation_id = %record.id,
            task_id = %record.task_id,
            attempt = record.attempt,
            cause = %record.cause,
            "Escalated to operator"
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<EscalationRecord> {
        self.storage.reload(COLLECTION)?;
        self.storage
            .get(COLLECTION, id)?
            .ok_or_else(|| DoeError::NotFound(format!("escalation {}", id)))
    }

    /// Escalations still awaiting a decision, oldest first
    pub fn pending(&self) -> Result<Vec<EscalationRecord>> {
        self.storage.reload(COLLECTION)?;
        self.storage.query(COLLECTION, &[Filter::is_null("decision")])
    }

    /// Every escalation, decided or not
    pub fn all(&self) -> Result<Vec<EscalationRecord>> {
        self.storage.reload(COLLECTION)?;
        self.storage.list(COLLECTION)
    }

    /// Record the operator's decision. An escalation is decided once.
    pub fn decide(
        &self,
        id: &str,
        decision: Decision,
        note: Option<String>,
        decided_by: Option<String>,
    ) -> Result<EscalationRecord> {
        let record = self.storage.modify(COLLECTION, id, |rec: &mut EscalationRecord| {
            if let Some(previous) = rec.decision {
                return Err(DoeError::AlreadyExists(format!(
                    "decision {:?} for escalation {}",
                    previous, rec.id
                )));
            }
            rec.decision = Some(decision);
            rec.note = note;
            rec.decided_by = decided_by;
            rec.decided_at = Some(Utc::now());
            Ok(())
        })?;
        info!(escalation_id = %id, decision = ?decision, "Escalation decided");
        self.decided.notify_waiters();
        Ok(record)
    }

    /// Mark a decided escalation as acted on. A decision is acted on once;
    /// a second claim fails with `AlreadyExists`.
    pub fn claim(&self, id: &str) -> Result<EscalationRecord> {
        self.storage.modify(COLLECTION, id, |rec: &mut EscalationRecord| {
            if rec.decision.is_none() {
                return Err(DoeError::Undecided(rec.id.clone()));
            }
            if rec.resumed_at.is_some() {
                return Err(DoeError::AlreadyExists(format!("resumption of escalation {}", rec.id)));
            }
            rec.resumed_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Undo a claim whose resumed run did not reach a terminal outcome,
    /// so the escalation can be resumed again.
    pub fn release(&self, id: &str) -> Result<EscalationRecord> {
        let record = self.storage.modify(COLLECTION, id, |rec: &mut EscalationRecord| {
            rec.resumed_at = None;
            Ok(())
        })?;
        info!(escalation_id = %id, "Escalation claim released");
        Ok(record)
    }

    /// Wait until the escalation has a decision or `cancel` fires
    pub async fn wait_for_decision(&self, id: &str, cancel: &CancellationToken) -> Result<EscalationRecord> {
        loop {
            let notified = self.decided.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.get(id)?;
            if record.decision.is_some() {
                return Ok(record);
            }
            debug!(escalation_id = %id, "Waiting for operator decision");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DoeError::Cancelled),
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
