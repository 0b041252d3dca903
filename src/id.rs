//! ID generation utilities for doe
//!
//! Provides functions for generating identifiers for escalations and events,
//! and for validating task identifiers.

use rand::Rng;

use crate::error::{DoeError, Result};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate an escalation ID
///
/// Format: `esc-{timestamp_ms}-{random_hex}`
pub fn generate_escalation_id() -> String {
    let random: u16 = rand::rng().random();
    format!("esc-{}-{:04x}", now_ms(), random)
}

/// Generate an event ID
///
/// Format: `evt-{timestamp_ms}-{random_hex}`
pub fn generate_event_id() -> String {
    let random: u16 = rand::rng().random();
    format!("evt-{}-{:04x}", now_ms(), random)
}

/// Suffix for temp files written next to their final path before a rename.
///
/// Unique per writer, so stores over the same directory never share a temp file.
pub(crate) fn temp_suffix() -> String {
    let random: u32 = rand::rng().random();
    format!("{}.{:08x}.tmp", std::process::id(), random)
}

/// Check that a task identifier can name a directive document.
///
/// Allowed: ASCII alphanumerics, `-`, `_`, `.`; must not start with `.`.
pub fn validate_task_id(task_id: &str) -> Result<()> {
    let valid = !task_id.is_empty()
        && !task_id.starts_with('.')
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DoeError::InvalidTaskId(task_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_escalation_id_format() {
        let id = generate_escalation_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "esc");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_event_id_prefix() {
        assert!(generate_event_id().starts_with("evt-"));
    }

    #[test]
    fn test_temp_suffix_is_unique_per_call() {
        let a = temp_suffix();
        let b = temp_suffix();
        assert!(a.ends_with(".tmp"));
        assert!(a.starts_with(&std::process::id().to_string()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_task_id() {
        assert!(validate_task_id("fetch-summary").is_ok());
        assert!(validate_task_id("scrape_v2.daily").is_ok());
        assert!(validate_task_id("").is_err());
        assert!(validate_task_id(".hidden").is_err());
        assert!(validate_task_id("../etc/passwd").is_err());
        assert!(validate_task_id("has space").is_err());
    }
}
