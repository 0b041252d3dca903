//! Doe - directive-driven task routing with feedback-based repair
//!
//! A task identifier maps to a directive (goal, I/O contract, edge cases,
//! learnings) and a bound deterministic tool. The orchestrator runs the tool
//! under a retry policy, classifies failures, escalates what it must not
//! retry on its own, and records every terminal failure back into the
//! directive so the next run knows more than the last.

pub mod annealer;
pub mod classifier;
pub mod directive;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod id;
pub mod observability;
pub mod orchestrator;
pub mod schema;
pub mod storage;
pub mod tools;

pub use error::{DoeError, Result};
