//! Source tracking shared by every derived notifier.
//!
//! Each source is reduced to a [`SourceState`] and the states are folded by
//! one rule, in this order:
//! 1. any error wins (first error in source order)
//! 2. any loading source makes the result loading, unless loading is ignored
//! 3. every source has data → ready
//! 4. otherwise pending (nothing is written)

use std::sync::Arc;

use crate::error::NotifierError;
use crate::notifier::{Notifier, Subscription};
use crate::result::{AsyncResult, Value};

/// What a derived notifier needs to know about one source.
#[derive(Clone, Debug)]
pub(crate) struct SourceState {
    pub(crate) loading: bool,
    pub(crate) error: Option<NotifierError>,
    pub(crate) has_data: bool,
}

impl SourceState {
    pub(crate) fn of<S>(result: &AsyncResult<S>) -> Self {
        Self {
            loading: result.is_loading(),
            error: result.error().cloned(),
            has_data: result.has_data(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Aggregate {
    /// First error in source order; `complete` if every source also has data.
    Failed { error: NotifierError, complete: bool },
    Loading,
    Ready,
    Pending,
}

pub(crate) fn aggregate(states: &[SourceState], ignore_loading: bool) -> Aggregate {
    let complete = states.iter().all(|s| s.has_data);
    if let Some(error) = states.iter().find_map(|s| s.error.clone()) {
        return Aggregate::Failed { error, complete };
    }
    if !ignore_loading && states.iter().any(|s| s.loading) {
        return Aggregate::Loading;
    }
    if complete {
        Aggregate::Ready
    } else {
        Aggregate::Pending
    }
}

/// Upstream subscriptions of one derived notifier.
///
/// Attached to the derived notifier, so they are released when it is
/// disposed or its last handle drops.
pub(crate) struct Dependencies {
    subscriptions: Vec<Subscription>,
}

impl Dependencies {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Calls `on_change` on every transition of `source`.
    pub(crate) fn watch<S: Value>(
        &mut self,
        source: &Notifier<S>,
        on_change: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), NotifierError> {
        let subscription = source.listen(move |_: &AsyncResult<S>| on_change())?;
        self.subscriptions.push(subscription);
        Ok(())
    }

    pub(crate) fn attach_to<U: Value>(self, target: &Notifier<U>) -> Result<(), NotifierError> {
        target.attach(self.subscriptions)
    }
}
