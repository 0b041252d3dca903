//! Storage trait definitions and filter types.

use crate::error::Result;
use serde::{Serialize, de::DeserializeOwned};

/// Filter operations for querying records.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Field equals value (a missing field equals null)
    Eq,
    /// Field does not equal value
    Ne,
}

/// A filter for querying records.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Field name to filter on
    pub field: String,
    /// Filter operation
    pub op: FilterOp,
    /// Value to compare against
    pub value: serde_json::Value,
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ne,
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Match records whose field is absent or null.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::eq(field, serde_json::Value::Null)
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        let field_value = record.get(&self.field).unwrap_or(&serde_json::Value::Null);
        match self.op {
            FilterOp::Eq => *field_value == self.value,
            FilterOp::Ne => *field_value != self.value,
        }
    }
}

/// Trait for records that have an ID field.
pub trait HasId {
    /// Get the record's unique identifier.
    fn id(&self) -> &str;
}

/// Storage trait for record collections.
pub trait Storage: Send + Sync {
    /// Create a new record.
    fn create<T: Serialize + HasId>(&self, collection: &str, record: &T) -> Result<()>;

    /// Get a record by ID.
    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>>;

    /// Atomically read, modify and persist a record.
    ///
    /// The closure runs while the collection is locked; returning an error
    /// leaves the record untouched.
    fn modify<T, F>(&self, collection: &str, id: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<()>;

    /// Query records with filters.
    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>>;

    /// List all records in a collection.
    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq_matches() {
        let filter = Filter::eq("task_id", "fetch-summary");
        let record = json!({"id": "1", "task_id": "fetch-summary"});
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_filter_eq_no_match() {
        let filter = Filter::eq("task_id", "fetch-summary");
        let record = json!({"id": "1", "task_id": "scrape"});
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_filter_is_null_matches_missing_and_null() {
        let filter = Filter::is_null("decision");
        assert!(filter.matches(&json!({"id": "1"})));
        assert!(filter.matches(&json!({"id": "1", "decision": null})));
        assert!(!filter.matches(&json!({"id": "1", "decision": "retry"})));
    }

    #[test]
    fn test_filter_ne() {
        let filter = Filter::ne("decision", "abort");
        assert!(filter.matches(&json!({"decision": "retry"})));
        assert!(filter.matches(&json!({})));
        assert!(!filter.matches(&json!({"decision": "abort"})));
    }
}
