//! Ledger event sink trait and implementations.

use std::sync::{Arc, Mutex};

use super::LedgerEvent;

/// Receives ledger events after successful writes.
///
/// `emit()` must be fast and non-blocking. Failing to handle an event must
/// never fail the write that produced it.
pub trait LedgerEventSink: Send + Sync {
    fn emit(&self, event: LedgerEvent);

    fn emit_batch(&self, events: Vec<LedgerEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Discards every event.
#[derive(Clone, Default)]
pub struct NoOpLedgerEventSink;

impl LedgerEventSink for NoOpLedgerEventSink {
    fn emit(&self, _event: LedgerEvent) {}
}

/// Mock sink for testing - collects emitted events.
#[derive(Clone, Default)]
pub struct MockLedgerEventSink {
    events: Arc<Mutex<Vec<LedgerEvent>>>,
}

impl MockLedgerEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl LedgerEventSink for MockLedgerEventSink {
    fn emit(&self, event: LedgerEvent) {
        self.events.lock().unwrap().push(event);
    }
}
