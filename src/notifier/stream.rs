//! # Stream binding.
//!
//! A notifier can follow one stream of `Result<T, E>` items at a time. Each
//! item is written as `Data` or `Error` (keeping the previous data). Binding a
//! new stream aborts the previous one before anything else, and items from an
//! aborted stream that were already in flight are discarded by identity.

use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{BoxError, NotifierError};
use crate::result::Value;

use super::core::{ensure_active, Notifier};
use super::fetch::Outcome;

/// Abort handle of the bound stream's pump task.
pub(crate) struct StreamSlot {
    id: u64,
    abort: AbortHandle,
}

impl StreamSlot {
    pub(crate) fn abort(self) {
        debug!(stream = self.id, "stream unbound");
        self.abort.abort();
    }
}

impl<T: Value> Notifier<T> {
    /// Follows `stream`, replacing any stream bound earlier.
    ///
    /// Writes `Loading` (keeping data) right away, then one result per item.
    /// The stream is dropped on [`cancel`](Self::cancel), on
    /// [`dispose`](Self::dispose), or when a later bind replaces it.
    pub fn bind_stream<S, E>(&self, stream: S) -> Result<(), NotifierError>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| NotifierError::NoRuntime)?;
        let (id, drain) = {
            let mut st = self.shared.state.lock();
            ensure_active(&st)?;
            if let Some(previous) = st.stream.take() {
                previous.abort();
            }
            st.stream_seq += 1;
            let loading = st.value.to_loading();
            let drain = self.write_locked(&mut st, loading, true);
            (st.stream_seq, drain)
        };
        if drain {
            self.drain();
        }

        let weak = self.downgrade();
        let pump = runtime.spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(item) = stream.next().await {
                let Some(notifier) = weak.upgrade() else {
                    break;
                };
                let outcome = Outcome::from(item.map_err(NotifierError::failed));
                if !notifier.push_stream_item(id, outcome) {
                    break;
                }
            }
        });

        let mut st = self.shared.state.lock();
        if st.active && st.stream_seq == id {
            st.stream = Some(StreamSlot {
                id,
                abort: pump.abort_handle(),
            });
        } else {
            // replaced or cancelled before the pump was registered
            pump.abort();
        }
        debug!(stream = id, "stream bound");
        Ok(())
    }

    /// Drops the bound stream, if any; the current result is left as is.
    pub fn unbind_stream(&self) -> bool {
        let slot = {
            let mut st = self.shared.state.lock();
            st.stream_seq += 1;
            st.stream.take()
        };
        match slot {
            Some(slot) => {
                slot.abort();
                true
            }
            None => false,
        }
    }

    /// Writes one stream item; `false` once the stream is no longer bound.
    fn push_stream_item(&self, id: u64, outcome: Outcome<T>) -> bool {
        let drain = {
            let mut st = self.shared.state.lock();
            if !st.active || st.stream_seq != id {
                return false;
            }
            let next = outcome.resolve(&st.value);
            self.write_locked(&mut st, next, false)
        };
        if drain {
            self.drain();
        }
        true
    }
}
