//! Observability sinks for run and learning events.
//!
//! The orchestrator emits one `run.*` event per terminal outcome plus
//! `learning.recorded` / `revision.requested` from the annealer. Where the
//! events end up is the sink's business.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::domain::EventRecord;
use crate::error::{DoeError, Result};
use crate::storage::JsonlStorage;

/// Destination for structured events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EventRecord) -> Result<()>;
}

/// Emits each event as a structured tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EventRecord) -> Result<()> {
        info!(
            target: "doe::events",
            event_id = %event.id,
            event_type = %event.event_type,
            task_id = %event.task_id,
            payload = %event.payload,
            "event"
        );
        Ok(())
    }
}

/// Appends events to `<dir>/events.jsonl`
#[derive(Debug)]
pub struct JsonlEventSink {
    storage: JsonlStorage,
}

const EVENTS_COLLECTION: &str = "events";

impl JsonlEventSink {
    pub fn open(dir: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            storage: JsonlStorage::new(dir)?,
        })
    }

    /// Every event written so far, oldest first
    pub fn read_all(&self) -> Result<Vec<EventRecord>> {
        self.storage.read_all(EVENTS_COLLECTION)
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, event: &EventRecord) -> Result<()> {
        self.storage.append(EVENTS_COLLECTION, event)
    }
}

/// Keeps events in memory; handy for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events of one type, oldest first
    pub fn of_type(&self, event_type: &str) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &EventRecord) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| DoeError::Storage(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Forwards each event to every inner sink
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    /// Every sink sees the event even if an earlier one fails; the first
    /// error is returned.
    fn emit(&self, event: &EventRecord) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event_types;
    use tempfile::TempDir;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &EventRecord) -> Result<()> {
            Err(DoeError::Storage("sink offline".to_string()))
        }
    }

    #[test]
    fn test_jsonl_sink_appends() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlEventSink::open(temp.path()).unwrap();
        sink.emit(&EventRecord::run_succeeded("a", 1, 0)).unwrap();
        sink.emit(&EventRecord::run_succeeded("b", 2, 1)).unwrap();

        let events = sink.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].task_id, "b");
        assert!(temp.path().join("events.jsonl").exists());
    }

    #[test]
    fn test_memory_sink_filters_by_type() {
        let sink = MemorySink::new();
        sink.emit(&EventRecord::run_succeeded("a", 1, 0)).unwrap();
        sink.emit(&EventRecord::new(event_types::REVISION_REQUESTED, "a", serde_json::json!({})))
            .unwrap();
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.of_type(event_types::RUN_SUCCEEDED).len(), 1);
    }

    #[test]
    fn test_fanout_reaches_all_sinks_despite_failure() {
        let memory = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new()
            .with(Arc::new(FailingSink))
            .with(Arc::clone(&memory) as Arc<dyn EventSink>)
            .with(Arc::new(TracingSink));

        let result = fanout.emit(&EventRecord::run_succeeded("a", 1, 0));
        assert!(result.is_err());
        assert_eq!(memory.events().len(), 1);
    }
}
