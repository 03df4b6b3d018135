//! Ledger event sink for the worker runtime.
//!
//! Storage emits ledger events while the services that consume them are still
//! being built, so the sink buffers events in a channel until the consumer is
//! attached with `start_worker()`.

use std::sync::{Arc, Mutex};

use ledgerkeep_core::events::{LedgerEvent, LedgerEventSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct WorkerLedgerEventSink {
    tx: mpsc::UnboundedSender<LedgerEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LedgerEvent>>>,
}

impl WorkerLedgerEventSink {
    /// Events emitted before `start_worker()` stay buffered.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Forwards every buffered and future event to `target`.
    ///
    /// Only the first call starts a forwarder; later calls return `None`.
    pub fn start_worker(&self, target: Arc<dyn LedgerEventSink>) -> Option<JoinHandle<()>> {
        let rx = match self.rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut rx) = rx else {
            tracing::warn!("Ledger event worker already started");
            return None;
        };

        Some(tokio::spawn(async move {
            tracing::info!("Ledger event worker started");
            while let Some(event) = rx.recv().await {
                target.emit(event);
            }
            tracing::debug!("Ledger event channel closed");
        }))
    }

    #[cfg(test)]
    pub fn with_sender(tx: mpsc::UnboundedSender<LedgerEvent>) -> Self {
        Self {
            tx,
            rx: Mutex::new(None),
        }
    }
}

impl Default for WorkerLedgerEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerEventSink for WorkerLedgerEventSink {
    fn emit(&self, event: LedgerEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!("Failed to emit ledger event: {}", e);
        }
    }
}
