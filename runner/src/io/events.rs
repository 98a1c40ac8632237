//! Delivery of domain events emitted by runner operations.

use parking_lot::Mutex;
use tracing::info;

use crate::core::types::DomainEvent;

/// Receives the events of one operation, in emission order, before persistence.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &DomainEvent);
}

/// Logs every event at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn deliver(&self, event: &DomainEvent) {
        info!(event = ?event, "domain event");
    }
}

/// Keeps every delivered event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for RecordingEventSink {
    fn deliver(&self, event: &DomainEvent) {
        self.events.lock().push(event.clone());
    }
}
