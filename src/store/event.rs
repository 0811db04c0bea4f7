//! # Keyed store lifecycle events.
//!
//! Each event has a globally unique, monotonically increasing sequence number
//! (`seq`). Use it to restore order when events are consumed out of order.
//!
//! ## Example
//! ```rust
//! use fetchcell::{StoreEvent, StoreEventKind};
//!
//! let ev = StoreEvent::new(StoreEventKind::EntryEvicted).with_key("user:42");
//! assert_eq!(ev.kind, StoreEventKind::EntryEvicted);
//! assert_eq!(ev.key.as_deref(), Some("user:42"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of store events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// A notifier was created for a key.
    ///
    /// Sets `key`.
    EntryCreated,

    /// An idle entry was evicted by the sweep (teardown ran, notifier disposed).
    ///
    /// Sets `key`.
    EntryEvicted,

    /// An entry was removed explicitly.
    ///
    /// Sets `key`.
    EntryRemoved,

    /// Every entry was disposed by `clear()`.
    ///
    /// Sets `count`.
    StoreCleared,

    /// A sweep finished.
    ///
    /// Sets `count` (entries evicted by this sweep).
    SweepCompleted,
}

/// Store event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - `key`: debug rendering of the entry key
#[derive(Clone, Debug)]
pub struct StoreEvent {
    pub seq: u64,
    pub at: SystemTime,
    pub kind: StoreEventKind,
    pub key: Option<Arc<str>>,
    pub count: Option<usize>,
}

impl StoreEvent {
    pub fn new(kind: StoreEventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            key: None,
            count: None,
        }
    }

    #[inline]
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[inline]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}
