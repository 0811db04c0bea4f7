//! # Listener registry and ordered dispatch.
//!
//! [`ListenerSet`] lives inside the notifier state (behind the notifier lock)
//! and holds both the registered callbacks and a FIFO queue of results still
//! waiting to be delivered.
//!
//! ## Architecture
//! ```text
//! write(result) ──► [lock] value = result; pending.push_back(result)
//!                          └─ dispatching? ─► yes: return (the active drain delivers it)
//!                                          └► no:  dispatching = true, drain()
//! drain():
//!   loop {
//!     [lock] pop_front + snapshot callbacks   (None → dispatching = false, exit)
//!     [unlocked] call each callback (panic isolated)
//!   }
//! ```
//!
//! ## Rules
//! - **Write order**: results reach listeners in the exact order they were written
//! - **Re-entrancy**: a write from inside a callback is queued behind the current one
//! - **Isolation**: a panicking callback is logged; the others still run

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::result::AsyncResult;

/// Callback invoked on each result transition.
pub(crate) type Listener<T> = Arc<dyn Fn(&AsyncResult<T>) + Send + Sync>;

/// Handle returned by [`Notifier::add_listener`](crate::Notifier::add_listener).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(ListenerId, Listener<T>)>,
    pending: VecDeque<AsyncResult<T>>,
    dispatching: bool,
}

impl<T> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
            pending: VecDeque::new(),
            dispatching: false,
        }
    }

    pub(crate) fn insert(&mut self, listener: Listener<T>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    /// Removes the listener, handing it back so it can be dropped outside the lock.
    pub(crate) fn remove(&mut self, id: ListenerId) -> Option<Listener<T>> {
        let pos = self.entries.iter().position(|(entry, _)| *entry == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queues `result`; returns `true` if the caller must start draining.
    pub(crate) fn enqueue(&mut self, result: AsyncResult<T>) -> bool {
        if self.entries.is_empty() && !self.dispatching {
            return false;
        }
        self.pending.push_back(result);
        if self.dispatching {
            false
        } else {
            self.dispatching = true;
            true
        }
    }

    /// Pops the next queued result together with the callbacks to run.
    ///
    /// Returns `None` (and ends the dispatch round) once the queue is empty.
    pub(crate) fn next_delivery(&mut self) -> Option<(AsyncResult<T>, Vec<Listener<T>>)> {
        match self.pending.pop_front() {
            Some(result) => {
                let callbacks = self.entries.iter().map(|(_, l)| Arc::clone(l)).collect();
                Some((result, callbacks))
            }
            None => {
                self.dispatching = false;
                None
            }
        }
    }
}

/// Calls every callback with `result`, isolating panics.
pub(crate) fn deliver<T>(result: &AsyncResult<T>, callbacks: &[Listener<T>]) {
    for callback in callbacks {
        call_isolated("notifier listener", || callback(result));
    }
}

/// Runs a user callback, logging a panic instead of unwinding into the caller.
pub(crate) fn call_isolated(what: &'static str, f: impl FnOnce()) {
    if let Err(panic_err) = catch_unwind(AssertUnwindSafe(f)) {
        let info = panic_message(panic_err.as_ref());
        tracing::error!(callback = what, panic = %info, "callback panicked");
    }
}

/// Text of a panic payload raised by `panic!` with a literal or formatted message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// RAII listener registration: removes the listener when dropped.
///
/// Returned by [`Notifier::listen`](crate::Notifier::listen) and
/// [`KeyedStore::on_result`](crate::KeyedStore::on_result).
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Keeps the listener registered for the lifetime of its source.
    pub fn forget(mut self) {
        self.detach = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}
