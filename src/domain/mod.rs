//! Domain types for doe
//!
//! This module contains the core domain types:
//! - Directive: task document with I/O contract and learnings log
//! - ExecutionOutcome / FailureCause: result of running a bound tool
//! - EscalationRecord: a run parked for an operator decision
//! - EventRecord: structured observability events
//! - RunState / RunTrace: orchestrator state machine and per-run trace

pub mod directive;
pub mod escalation;
pub mod event;
pub mod outcome;
pub mod run;

pub use directive::{Directive, LearningDraft, LearningEntry, LearningRef};
pub use escalation::{Decision, EscalationRecord};
pub use event::{EventRecord, event_types};
pub use outcome::{ExecutionOutcome, FailureCategory, FailureCause};
pub use run::{RunState, RunTrace};
