//! # The value held by every notifier.
//!
//! [`AsyncResult`] is a tagged union of four variants. Every variant except
//! `Data` carries the *previous* data as an `Option`, so [`has_data`] never
//! depends on which variant is active:
//!
//! ```text
//! Initial { data?, last_update }   ─┐ is_loading()
//! Loading { data?, last_update }   ─┘
//! Data    { data,  last_update }
//! Error   { error, data?, last_update }   (error = NoData | Cancelled | Disposed | Failed)
//! ```
//!
//! All transformations are pure and return a new value.
//!
//! [`has_data`]: AsyncResult::has_data

use crate::error::NotifierError;

use super::timestamp::Timestamp;

/// Loading / data / error state with retained previous data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AsyncResult<T> {
    /// Pre-fetch state. Counts as loading.
    Initial { data: Option<T>, last_update: Timestamp },
    /// A refresh is in progress.
    Loading { data: Option<T>, last_update: Timestamp },
    /// Authoritative value.
    Data { data: T, last_update: Timestamp },
    /// Failure, keeping the last known data.
    Error {
        error: NotifierError,
        data: Option<T>,
        last_update: Timestamp,
    },
}

/// Borrowed view for exhaustive dispatch.
///
/// Cancellation is split out of `Error` so a cancellation arm is matched
/// before the generic error arm. Callers without a dedicated cancellation
/// handler match `Phase::Cancelled(..) | Phase::Error(..)` together.
#[derive(Debug, PartialEq)]
pub enum Phase<'a, T> {
    Initial(Option<&'a T>),
    Loading(Option<&'a T>),
    Data(&'a T),
    Cancelled(Option<&'a T>),
    Error(&'a NotifierError, Option<&'a T>),
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        AsyncResult::Initial {
            data: None,
            last_update: Timestamp::EPOCH,
        }
    }
}

impl<T> AsyncResult<T> {
    /// `Initial` with no data.
    #[inline]
    pub fn initial() -> Self {
        Self::default()
    }

    /// `Data` stamped now.
    #[inline]
    pub fn ready(data: T) -> Self {
        AsyncResult::Data {
            data,
            last_update: Timestamp::now(),
        }
    }

    /// `Error` without data, stamped now.
    #[inline]
    pub fn failed(error: NotifierError) -> Self {
        AsyncResult::Error {
            error,
            data: None,
            last_update: Timestamp::now(),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            AsyncResult::Data { data, .. } => Some(data),
            AsyncResult::Initial { data, .. }
            | AsyncResult::Loading { data, .. }
            | AsyncResult::Error { data, .. } => data.as_ref(),
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            AsyncResult::Data { data, .. } => Some(data),
            AsyncResult::Initial { data, .. }
            | AsyncResult::Loading { data, .. }
            | AsyncResult::Error { data, .. } => data,
        }
    }

    pub fn error(&self) -> Option<&NotifierError> {
        match self {
            AsyncResult::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn last_update(&self) -> Timestamp {
        match self {
            AsyncResult::Initial { last_update, .. }
            | AsyncResult::Loading { last_update, .. }
            | AsyncResult::Data { last_update, .. }
            | AsyncResult::Error { last_update, .. } => *last_update,
        }
    }

    /// Settles the result: `Data` → `Ok`, `Error` → `Err(error)`, loading → `Err(NoData)`.
    pub fn into_result(self) -> Result<T, NotifierError> {
        match self {
            AsyncResult::Data { data, .. } => Ok(data),
            AsyncResult::Error { error, .. } => Err(error),
            AsyncResult::Initial { .. } | AsyncResult::Loading { .. } => {
                Err(NotifierError::NoData)
            }
        }
    }

    pub fn phase(&self) -> Phase<'_, T> {
        match self {
            AsyncResult::Initial { data, .. } => Phase::Initial(data.as_ref()),
            AsyncResult::Loading { data, .. } => Phase::Loading(data.as_ref()),
            AsyncResult::Data { data, .. } => Phase::Data(data),
            AsyncResult::Error {
                error: NotifierError::Cancelled,
                data,
                ..
            } => Phase::Cancelled(data.as_ref()),
            AsyncResult::Error { error, data, .. } => Phase::Error(error, data.as_ref()),
        }
    }

    /// Maps the payload, keeping variant, error and timestamp.
    pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> AsyncResult<U> {
        match self {
            AsyncResult::Initial { data, last_update } => AsyncResult::Initial {
                data: data.as_ref().map(f),
                last_update: *last_update,
            },
            AsyncResult::Loading { data, last_update } => AsyncResult::Loading {
                data: data.as_ref().map(f),
                last_update: *last_update,
            },
            AsyncResult::Data { data, last_update } => AsyncResult::Data {
                data: f(data),
                last_update: *last_update,
            },
            AsyncResult::Error {
                error,
                data,
                last_update,
            } => AsyncResult::Error {
                error: error.clone(),
                data: data.as_ref().map(f),
                last_update: *last_update,
            },
        }
    }

    // ---- predicates ----

    #[inline]
    pub fn is_initial(&self) -> bool {
        matches!(self, AsyncResult::Initial { .. })
    }

    /// `true` for `Initial` and `Loading`.
    #[inline]
    pub fn is_loading(&self) -> bool {
        matches!(self, AsyncResult::Initial { .. } | AsyncResult::Loading { .. })
    }

    /// `true` for `Loading` only (a refresh actually started).
    #[inline]
    pub fn is_loading_data(&self) -> bool {
        matches!(self, AsyncResult::Loading { .. })
    }

    #[inline]
    pub fn is_reloading(&self) -> bool {
        self.is_loading_data() && self.has_data()
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, AsyncResult::Data { .. })
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, AsyncResult::Error { .. })
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AsyncResult::Error {
                error: NotifierError::Cancelled,
                ..
            }
        )
    }

    #[inline]
    pub fn has_data(&self) -> bool {
        self.data().is_some()
    }
}

impl<T: Clone> AsyncResult<T> {
    /// `Data` from `explicit` or the current data, `Error(NoData)` if neither exists.
    pub fn to_data(&self, explicit: Option<T>) -> Self {
        match explicit.or_else(|| self.data().cloned()) {
            Some(data) => AsyncResult::ready(data),
            None => AsyncResult::failed(NotifierError::NoData),
        }
    }

    /// Like [`to_data`](Self::to_data) but falls back to `fallback` instead of failing.
    pub fn to_data_or_else(&self, fallback: impl FnOnce() -> T) -> Self {
        AsyncResult::ready(self.data().cloned().unwrap_or_else(fallback))
    }

    pub fn to_loading(&self) -> Self {
        AsyncResult::Loading {
            data: self.data().cloned(),
            last_update: self.last_update(),
        }
    }

    pub fn to_initial(&self) -> Self {
        AsyncResult::Initial {
            data: self.data().cloned(),
            last_update: self.last_update(),
        }
    }

    pub fn to_error(&self, error: NotifierError) -> Self {
        AsyncResult::Error {
            error,
            data: self.data().cloned(),
            last_update: Timestamp::now(),
        }
    }

    pub fn to_cancelled(&self) -> Self {
        self.to_error(NotifierError::Cancelled)
    }

    /// Same variant with the timestamp replaced.
    pub fn with_timestamp(&self, at: Timestamp) -> Self {
        let mut next = self.clone();
        match &mut next {
            AsyncResult::Initial { last_update, .. }
            | AsyncResult::Loading { last_update, .. }
            | AsyncResult::Data { last_update, .. }
            | AsyncResult::Error { last_update, .. } => *last_update = at,
        }
        next
    }

    /// Ages the result to epoch zero so any expiration check fails.
    pub fn to_stale(&self) -> Self {
        self.with_timestamp(Timestamp::EPOCH)
    }

    pub fn to_fresh(&self) -> Self {
        self.with_timestamp(Timestamp::now())
    }
}
