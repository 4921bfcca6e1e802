//! Post-commit event fan-out

use parking_lot::Mutex;
use revstore_core::DocumentEvent;
use std::sync::mpsc::{channel, Receiver, Sender};
use tracing::trace;

/// Subscriber list owned by a `Database`.
///
/// Senders whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<DocumentEvent>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self) -> Receiver<DocumentEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver committed events in order to every live subscriber.
    pub(crate) fn publish(&self, events: Vec<DocumentEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        for event in events {
            trace!(target: "revstore::db", doc_id = %event.doc_id(), "Publishing event");
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
