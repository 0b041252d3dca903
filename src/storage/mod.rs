//! Storage layer for doe - JSONL collections with in-memory caching.
//!
//! Used for the records that are appended far more often than edited:
//! escalations, terminal-outcome events, archived learnings.

mod jsonl;
mod traits;

pub use jsonl::JsonlStorage;
pub use traits::{Filter, FilterOp, HasId, Storage};
