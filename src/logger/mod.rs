//! Run event logging: the JSONL writer and the sink seam the runner writes to.

#![allow(missing_docs)]

pub mod jsonl;

use std::sync::Arc;

use parking_lot::Mutex;

pub use jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Destination for run events. Sinks never fail the run.
pub trait EventSink: Send {
    fn emit(&mut self, entry: &LogEntry);

    fn flush(&mut self) {}
}

/// Collects entries in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Events seen so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<EventType> {
        self.entries.lock().iter().map(|e| e.event).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, entry: &LogEntry) {
        self.entries.lock().push(entry.clone());
    }
}
