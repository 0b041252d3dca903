//! Orchestrator - the top-level control loop.
//!
//! Resolves a task identifier to its directive and tool binding, runs the
//! executor, and turns the outcome into one of three reports: succeeded,
//! failed (with the learning the annealer recorded), or escalated (parked in
//! the durable escalation queue until an operator decides).
//!
//! Unknown tasks, schema mismatches and invalid inputs are returned as
//! errors before any tool is invoked. The latter two are terminal run
//! outcomes and also emit `run.failed`; an unknown task emits nothing.

mod intent;

pub use intent::{DirectResolver, IntentResolver};

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::annealer::{Annealer, FailurePath};
use crate::classifier::FailureClassifier;
use crate::directive::DirectiveStore;
use crate::domain::{
    Decision, EscalationRecord, EventRecord, ExecutionOutcome, FailureCause, LearningRef, RunState, RunTrace,
};
use crate::error::{DoeError, Result};
use crate::escalation::EscalationQueue;
use crate::executor::{ExecutionPolicy, Executor, ExecutorConfig};
use crate::observability::EventSink;
use crate::tools::{ToolBinding, ToolRegistry};

/// Terminal (or parked) result of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        value: Value,
    },
    Failed {
        cause: FailureCause,
        /// Learning the annealer recorded; `None` for cancellations
        learning: Option<LearningRef>,
    },
    Escalated {
        escalation_id: String,
        cause: FailureCause,
    },
}

/// What a caller gets back from a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_id: String,
    pub outcome: RunOutcome,
    pub trace: RunTrace,
}

impl RunReport {
    pub fn is_succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.outcome, RunOutcome::Failed { cause, .. } if cause.is_cancelled())
    }

    pub fn learning(&self) -> Option<&LearningRef> {
        match &self.outcome {
            RunOutcome::Failed { learning, .. } => learning.as_ref(),
            _ => None,
        }
    }

    pub fn escalation_id(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Escalated { escalation_id, .. } => Some(escalation_id),
            _ => None,
        }
    }
}

pub struct Orchestrator {
    directives: Arc<DirectiveStore>,
    registry: Arc<ToolRegistry>,
    executor: Executor,
    annealer: Annealer,
    escalations: Arc<EscalationQueue>,
    sink: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl Orchestrator {
    pub fn new(
        directives: Arc<DirectiveStore>,
        registry: Arc<ToolRegistry>,
        escalations: Arc<EscalationQueue>,
        sink: Arc<dyn EventSink>,
        classifier: FailureClassifier,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            executor: Executor::new(Arc::clone(&registry), classifier),
            annealer: Annealer::new(Arc::clone(&directives), Arc::clone(&sink)),
            directives,
            registry,
            escalations,
            sink,
            config,
        }
    }

    pub fn directives(&self) -> &Arc<DirectiveStore> {
        &self.directives
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn escalations(&self) -> &Arc<EscalationQueue> {
        &self.escalations
    }

    /// Run a task with its binding's policy
    pub async fn run(&self, task_id: &str, inputs: Value, cancel: &CancellationToken) -> Result<RunReport> {
        self.run_with_policy(task_id, inputs, |policy| policy, cancel).await
    }

    /// Run a task, adjusting the binding's policy first
    pub async fn run_with_policy<F>(
        &self,
        task_id: &str,
        inputs: Value,
        adjust: F,
        cancel: &CancellationToken,
    ) -> Result<RunReport>
    where
        F: FnOnce(ExecutionPolicy) -> ExecutionPolicy,
    {
        let mut trace = RunTrace::new();
        let binding = self.resolve(task_id).inspect_err(|e| self.reject(task_id, e))?;
        let policy = adjust(ExecutionPolicy::for_binding(&binding, &self.config));
        info!(task_id, max_retries = policy.max_retries, "Run started");

        let outcome = self
            .executor
            .execute(&binding, &inputs, &policy, cancel, &mut trace)
            .await
            .inspect_err(|e| self.reject(task_id, e))?;
        Ok(self.conclude(&binding, inputs, outcome, trace, 0))
    }

    /// Resolve a free-text request through the decision-maker, then run it
    pub async fn handle_request(
        &self,
        resolver: &dyn IntentResolver,
        request: &str,
        inputs: Value,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let task_id = resolver.resolve_intent(request).await?;
        self.run(&task_id, inputs, cancel).await
    }

    /// Record an operator decision on an escalation
    pub fn decide(
        &self,
        escalation_id: &str,
        decision: Decision,
        note: Option<String>,
        decided_by: Option<String>,
    ) -> Result<EscalationRecord> {
        self.escalations.decide(escalation_id, decision, note, decided_by)
    }

    /// Act on a decided escalation: retry with the persisted inputs, or
    /// fail it and record the operator's note as a learning.
    ///
    /// A retry whose persisted inputs no longer satisfy the binding ends
    /// Failed with a learning. A retry that is cancelled (or errors) before
    /// reaching an outcome gives up its claim, so it can be resumed again.
    pub async fn resume(&self, escalation_id: &str, cancel: &CancellationToken) -> Result<RunReport> {
        let record = self.escalations.get(escalation_id)?;
        match record.decision {
            None => Err(DoeError::Undecided(record.id)),
            Some(Decision::Abort) => {
                let record = self.escalations.claim(escalation_id)?;
                Ok(self.abort(record))
            }
            Some(Decision::Retry) => {
                let binding = self
                    .resolve(&record.task_id)
                    .inspect_err(|e| self.reject(&record.task_id, e))?;
                let violations = binding.input_schema.validate(&record.inputs);
                let record = self.escalations.claim(escalation_id)?;
                if !violations.is_empty() {
                    return Ok(self.reject_resumed(&binding, record, violations));
                }
                info!(task_id = %record.task_id, escalation_id, "Resuming escalated run");

                let policy = ExecutionPolicy::for_binding(&binding, &self.config);
                let mut trace = RunTrace::starting_at(RunState::Escalated);
                let outcome = match self
                    .executor
                    .resume(&binding, &record.inputs, &policy, record.retries_used, cancel, &mut trace)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.release(escalation_id);
                        return Err(e);
                    }
                };
                if outcome.cause().is_some_and(FailureCause::is_cancelled) {
                    self.release(escalation_id);
                }
                Ok(self.conclude(&binding, record.inputs, outcome, trace, record.attempt))
            }
        }
    }

    /// Wait for the operator, then resume
    pub async fn await_and_resume(&self, escalation_id: &str, cancel: &CancellationToken) -> Result<RunReport> {
        self.escalations.wait_for_decision(escalation_id, cancel).await?;
        self.resume(escalation_id, cancel).await
    }

    /// Current directive and binding; both must exist and agree
    fn resolve(&self, task_id: &str) -> Result<Arc<ToolBinding>> {
        let directive = self.directives.get(task_id)?;
        let binding = self.registry.lookup(task_id)?;
        let problems = binding.schema_problems(&directive);
        if !problems.is_empty() {
            return Err(DoeError::SchemaMismatch {
                task_id: task_id.to_string(),
                problems,
            });
        }
        Ok(binding)
    }

    fn conclude(
        &self,
        binding: &ToolBinding,
        inputs: Value,
        outcome: ExecutionOutcome,
        mut trace: RunTrace,
        prior_attempts: u32,
    ) -> RunReport {
        let task_id = binding.task_id.as_str();
        let attempts = prior_attempts + trace.attempts;

        let outcome = match outcome {
            ExecutionOutcome::Success { value } => {
                self.emit(&EventRecord::run_succeeded(task_id, attempts, trace.backoffs.len() as u32));
                RunOutcome::Succeeded { value }
            }
            ExecutionOutcome::RecoverableFailure { cause, retries_used } => {
                let record = EscalationRecord::new(task_id, cause.clone(), attempts, retries_used, inputs);
                match self.escalations.open_escalation(&record) {
                    Ok(()) => {
                        self.emit(&EventRecord::run_escalated(&record));
                        RunOutcome::Escalated {
                            escalation_id: record.id,
                            cause,
                        }
                    }
                    Err(e) => {
                        // Without a durable record nobody can decide; fail the run instead
                        warn!(task_id, error = %e, "Could not persist escalation");
                        trace.enter(RunState::Failed);
                        self.fail(binding, cause, attempts, &FailurePath::NonRetryable)
                    }
                }
            }
            ExecutionOutcome::FatalFailure { cause, .. } if cause.is_cancelled() => {
                self.emit(&EventRecord::run_failed(task_id, &cause, attempts, None));
                RunOutcome::Failed { cause, learning: None }
            }
            ExecutionOutcome::FatalFailure { cause, exhausted, .. } => {
                let path = if exhausted {
                    FailurePath::Exhausted
                } else {
                    FailurePath::NonRetryable
                };
                self.fail(binding, cause, attempts, &path)
            }
        };

        RunReport {
            task_id: task_id.to_string(),
            outcome,
            trace,
        }
    }

    /// Persisted inputs broke a contract revised while the run was parked
    fn reject_resumed(&self, binding: &ToolBinding, record: EscalationRecord, violations: Vec<String>) -> RunReport {
        warn!(task_id = %record.task_id, escalation_id = %record.id, violations = ?violations, "Escalated inputs no longer valid");
        let mut trace = RunTrace::starting_at(RunState::Escalated);
        trace.enter(RunState::Retrying);
        trace.enter(RunState::Failed);
        let cause = FailureCause::invalid_input(violations.join("; "));
        let outcome = self.fail(binding, cause, record.attempt, &FailurePath::NonRetryable);
        RunReport {
            task_id: record.task_id,
            outcome,
            trace,
        }
    }

    fn release(&self, escalation_id: &str) {
        if let Err(e) = self.escalations.release(escalation_id) {
            warn!(escalation_id, error = %e, "Could not release escalation claim");
        }
    }

    /// Report a contract rejection; other errors are not run outcomes
    fn reject(&self, task_id: &str, error: &DoeError) {
        let (reason, problems) = match error {
            DoeError::SchemaMismatch { problems, .. } => ("schema_mismatch", problems),
            DoeError::InputSchemaViolation { violations, .. } => ("input_schema_violation", violations),
            _ => return,
        };
        self.emit(&EventRecord::run_rejected(task_id, reason, problems));
    }

    fn abort(&self, record: EscalationRecord) -> RunReport {
        let mut trace = RunTrace::starting_at(RunState::Escalated);
        trace.enter(RunState::Failed);
        let path = FailurePath::OperatorAbort {
            note: record.note.clone(),
            decided_by: record.decided_by.clone(),
        };
        let tool_revision = self
            .registry
            .lookup(&record.task_id)
            .ok()
            .and_then(|b| b.revision.clone());
        let learning = self.anneal(&record.task_id, &record.cause, record.attempt, &path, tool_revision.as_deref());
        self.emit(&EventRecord::run_failed(&record.task_id, &record.cause, record.attempt, learning.as_ref()));
        RunReport {
            task_id: record.task_id,
            outcome: RunOutcome::Failed {
                cause: record.cause,
                learning,
            },
            trace,
        }
    }

    fn fail(&self, binding: &ToolBinding, cause: FailureCause, attempts: u32, path: &FailurePath) -> RunOutcome {
        let task_id = binding.task_id.as_str();
        let learning = self.anneal(task_id, &cause, attempts, path, binding.revision.as_deref());
        self.emit(&EventRecord::run_failed(task_id, &cause, attempts, learning.as_ref()));
        RunOutcome::Failed { cause, learning }
    }

    fn anneal(
        &self,
        task_id: &str,
        cause: &FailureCause,
        attempts: u32,
        path: &FailurePath,
        tool_revision: Option<&str>,
    ) -> Option<LearningRef> {
        match self.annealer.record_failure(task_id, cause, attempts, path, tool_revision) {
            Ok(learning) => Some(learning),
            Err(e) => {
                warn!(task_id, error = %e, "Could not record learning");
                None
            }
        }
    }

    fn emit(&self, event: &EventRecord) {
        if let Err(e) = self.sink.emit(event) {
            warn!(event_type = %event.event_type, error = %e, "Failed to emit event");
        }
    }
}
