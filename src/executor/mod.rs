//! Executor - runs a bound tool under a timeout/retry policy.
//!
//! One attempt at a time: an attempt completes, times out or is cancelled
//! before the next begins. Failures go through the `FailureClassifier`;
//! retries sleep `base * 2^(n-1)` capped at `backoff_max`, raised to the
//! classifier's minimum delay hint when it gives one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{FailureClassifier, RecoveryAction};
use crate::domain::{ExecutionOutcome, FailureCause, RunState, RunTrace};
use crate::error::{DoeError, Result};
use crate::tools::{CatalogDefaults, ToolBinding, ToolRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout for bindings that do not declare one
    pub default_timeout_ms: u64,
    /// Retry budget for bindings that do not declare one
    pub default_max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            default_max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl ExecutorConfig {
    /// Limits for catalog entries that leave them unset
    pub fn catalog_defaults(&self) -> CatalogDefaults {
        CatalogDefaults {
            timeout: Duration::from_millis(self.default_timeout_ms),
            max_retries: self.default_max_retries,
        }
    }
}

/// Limits for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl ExecutionPolicy {
    /// Binding's own limits with the configured backoff curve
    pub fn for_binding(binding: &ToolBinding, config: &ExecutorConfig) -> Self {
        Self {
            timeout: binding.timeout,
            max_retries: binding.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exp).min(self.backoff_max)
    }
}

/// Outcome of a run plus the trace that produced it
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub trace: RunTrace,
}

pub struct Executor {
    registry: Arc<ToolRegistry>,
    classifier: FailureClassifier,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, classifier: FailureClassifier) -> Self {
        Self { registry, classifier }
    }

    /// Look up the binding for `task_id` and run it
    pub async fn run(
        &self,
        task_id: &str,
        inputs: &Value,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let binding = self.registry.lookup(task_id)?;
        let mut trace = RunTrace::new();
        let outcome = self.execute(&binding, inputs, policy, cancel, &mut trace).await?;
        Ok(ExecutionReport { outcome, trace })
    }

    /// Validate inputs, then attempt until success, a non-retry action,
    /// budget exhaustion or cancellation.
    ///
    /// Returns `InputSchemaViolation` without invoking the tool when the
    /// inputs do not satisfy the binding's input schema.
    pub async fn execute(
        &self,
        binding: &ToolBinding,
        inputs: &Value,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
        trace: &mut RunTrace,
    ) -> Result<ExecutionOutcome> {
        trace.enter(RunState::Validating);
        Self::validate_inputs(binding, inputs, trace)?;
        trace.enter(RunState::Executing);
        Ok(self.attempt_loop(binding, inputs, policy, 0, cancel, trace).await)
    }

    /// Continue an escalated run the operator chose to retry.
    ///
    /// The first attempt is made regardless of budget; automatic retries
    /// after it draw on what `retries_used` left.
    pub async fn resume(
        &self,
        binding: &ToolBinding,
        inputs: &Value,
        policy: &ExecutionPolicy,
        retries_used: u32,
        cancel: &CancellationToken,
        trace: &mut RunTrace,
    ) -> Result<ExecutionOutcome> {
        trace.enter(RunState::Retrying);
        Self::validate_inputs(binding, inputs, trace)?;
        trace.enter(RunState::Executing);
        Ok(self
            .attempt_loop(binding, inputs, policy, retries_used, cancel, trace)
            .await)
    }

    fn validate_inputs(binding: &ToolBinding, inputs: &Value, trace: &mut RunTrace) -> Result<()> {
        let violations = binding.input_schema.validate(inputs);
        if violations.is_empty() {
            return Ok(());
        }
        warn!(task_id = %binding.task_id, violations = ?violations, "Inputs rejected before invocation");
        trace.enter(RunState::Failed);
        Err(DoeError::InputSchemaViolation {
            task_id: binding.task_id.clone(),
            violations,
        })
    }

    /// Entered in `Executing`; leaves the trace in a terminal or `Escalated` state
    async fn attempt_loop(
        &self,
        binding: &ToolBinding,
        inputs: &Value,
        policy: &ExecutionPolicy,
        mut retries_used: u32,
        cancel: &CancellationToken,
        trace: &mut RunTrace,
    ) -> ExecutionOutcome {
        let task_id = binding.task_id.as_str();
        loop {
            trace.attempts += 1;
            debug!(task_id = %task_id, attempt = trace.attempts, "Invoking tool");

            let invocation = tokio::time::timeout(policy.timeout, binding.tool().invoke(inputs.clone()));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Self::cancelled(task_id, retries_used, trace),
                result = invocation => result,
            };

            let cause = match result {
                Ok(Ok(value)) => {
                    let violations = binding.output_schema.validate(&value);
                    if violations.is_empty() {
                        info!(task_id = %task_id, attempts = trace.attempts, "Run succeeded");
                        trace.enter(RunState::Succeeded);
                        return ExecutionOutcome::Success { value };
                    }
                    FailureCause::output_violation(&violations)
                }
                Ok(Err(cause)) => cause,
                Err(_) => FailureCause::timeout(policy.timeout),
            };

            trace.enter(RunState::Classifying);
            warn!(task_id = %task_id, attempt = trace.attempts, cause = %cause, "Attempt failed");

            match self.classifier.classify(task_id, &cause) {
                RecoveryAction::RetryWithBackoff { min_delay } => {
                    if retries_used >= policy.max_retries {
                        warn!(task_id = %task_id, retries_used, "Retry budget exhausted");
                        trace.enter(RunState::Failed);
                        return ExecutionOutcome::FatalFailure {
                            cause,
                            retries_used,
                            exhausted: true,
                        };
                    }
                    retries_used += 1;
                    let delay = policy.backoff_delay(retries_used).max(min_delay.unwrap_or_default());
                    trace.enter(RunState::Retrying);
                    info!(
                        task_id = %task_id,
                        retry = retries_used,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Self::cancelled(task_id, retries_used, trace),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    trace.backoffs.push(delay);
                    trace.enter(RunState::Executing);
                }
                RecoveryAction::EscalateToOperator => {
                    trace.enter(RunState::Escalated);
                    return ExecutionOutcome::RecoverableFailure { cause, retries_used };
                }
                RecoveryAction::PermanentFail => {
                    trace.enter(RunState::Failed);
                    return ExecutionOutcome::FatalFailure {
                        cause,
                        retries_used,
                        exhausted: false,
                    };
                }
            }
        }
    }

    fn cancelled(task_id: &str, retries_used: u32, trace: &mut RunTrace) -> ExecutionOutcome {
        info!(task_id = %task_id, state = %trace.current(), "Run cancelled");
        trace.enter(RunState::Failed);
        ExecutionOutcome::FatalFailure {
            cause: FailureCause::cancelled(),
            retries_used,
            exhausted: false,
        }
    }
}
