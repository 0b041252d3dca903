//! Execution outcome and failure cause types.
//!
//! A tool invocation ends in exactly one `ExecutionOutcome`. Failures carry a
//! `FailureCause` whose category drives the classifier.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a raw failure, the classifier's input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Upstream asked us to slow down (HTTP 429 and friends)
    RateLimited,
    /// Network blip, 5xx, temporary unavailability
    Transient,
    /// Tool did not return within the policy timeout
    Timeout,
    /// Tool rejected its inputs as malformed
    InvalidInput,
    /// Resource permanently gone (404/410, deleted upstream object)
    Gone,
    /// Proceeding would spend metered/paid resources
    MeteredSpend,
    /// Tool "succeeded" but its output broke the declared contract
    OutputSchemaViolation,
    /// Caller cancelled the run
    Cancelled,
    /// Anything the tool could not or did not classify
    Unknown,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 9] = [
        Self::RateLimited,
        Self::Transient,
        Self::Timeout,
        Self::InvalidInput,
        Self::Gone,
        Self::MeteredSpend,
        Self::OutputSchemaViolation,
        Self::Cancelled,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::InvalidInput => "invalid_input",
            Self::Gone => "gone",
            Self::MeteredSpend => "metered_spend",
            Self::OutputSchemaViolation => "output_schema_violation",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an invocation failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCause {
    pub category: FailureCategory,
    #[serde(default)]
    pub message: String,
    /// Upstream's suggested wait before retrying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Cost the retry would incur, in the operator's currency of choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

impl FailureCause {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retry_after_ms: None,
            estimated_cost: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            ..Self::new(FailureCategory::RateLimited, message)
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Transient, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureCategory::Timeout,
            format!("no result within {}ms", after.as_millis()),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::InvalidInput, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Gone, message)
    }

    pub fn metered(message: impl Into<String>, estimated_cost: f64) -> Self {
        Self {
            estimated_cost: Some(estimated_cost),
            ..Self::new(FailureCategory::MeteredSpend, message)
        }
    }

    pub fn output_violation(violations: &[String]) -> Self {
        Self::new(FailureCategory::OutputSchemaViolation, violations.join("; "))
    }

    pub fn cancelled() -> Self {
        Self::new(FailureCategory::Cancelled, "run cancelled by caller")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Unknown, message)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    pub fn is_cancelled(&self) -> bool {
        self.category == FailureCategory::Cancelled
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.category)
        } else {
            write!(f, "{}: {}", self.category, self.message)
        }
    }
}

/// Result of running a bound tool under an execution policy
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Output honoured the declared output schema
    Success { value: Value },
    /// Failure an operator may still recover (classified as escalate)
    RecoverableFailure { cause: FailureCause, retries_used: u32 },
    /// Retry budget exhausted, non-retryable cause, or cancellation
    FatalFailure {
        cause: FailureCause,
        retries_used: u32,
        exhausted: bool,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Success { .. } => None,
            Self::RecoverableFailure { cause, .. } | Self::FatalFailure { cause, .. } => Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_cause_display() {
        let cause = FailureCause::transient("connection reset");
        assert_eq!(cause.to_string(), "transient: connection reset");
        assert_eq!(FailureCause::new(FailureCategory::Gone, "").to_string(), "gone");
    }

    #[test]
    fn test_rate_limited_keeps_hint() {
        let cause = FailureCause::rate_limited("429", Some(Duration::from_secs(3)));
        assert_eq!(cause.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_cause_parses_from_tool_json() {
        let cause: FailureCause = serde_json::from_value(json!({
            "category": "metered_spend",
            "message": "would call paid API",
            "estimated_cost": 2.5
        }))
        .unwrap();
        assert_eq!(cause.category, FailureCategory::MeteredSpend);
        assert_eq!(cause.estimated_cost, Some(2.5));
        assert_eq!(cause.retry_after_ms, None);
    }

    #[test]
    fn test_category_names_match_serde() {
        for category in FailureCategory::ALL {
            let serialized = serde_json::to_value(category).unwrap();
            assert_eq!(serialized, json!(category.as_str()));
        }
    }

    #[test]
    fn test_outcome_cause_accessor() {
        let ok = ExecutionOutcome::Success { value: json!({}) };
        assert!(ok.is_success());
        assert!(ok.cause().is_none());

        let fatal = ExecutionOutcome::FatalFailure {
            cause: FailureCause::cancelled(),
            retries_used: 1,
            exhausted: false,
        };
        assert!(fatal.cause().unwrap().is_cancelled());
    }
}
