//! # Broadcast bus for store lifecycle events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: publishing never blocks, slow
//! receivers observe `RecvError::Lagged(n)` and skip the `n` oldest events, and
//! events sent while nobody is subscribed are lost.

use tokio::sync::broadcast;

use super::event::StoreEvent;

#[derive(Clone, Debug)]
pub(crate) struct Bus {
    tx: broadcast::Sender<StoreEvent>,
}

impl Bus {
    /// Creates a bus; capacity is clamped to at least 1.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<StoreEvent>(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn publish(&self, ev: StoreEvent) {
        let _ = self.tx.send(ev);
    }

    /// A receiver only gets events sent after it subscribes.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}
