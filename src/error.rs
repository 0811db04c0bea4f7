//! Error types used by notifiers, derived notifiers and the keyed store.
//!
//! [`NotifierError`] is both the error returned by fallible operations and the
//! payload of the [`AsyncResult::Error`](crate::AsyncResult::Error) variant, so
//! the sub-kind (no data / cancelled / disposed / user failure) travels with the
//! stored result.
//!
//! Like the rest of the crate's public errors it provides `as_label`/`as_message`
//! helpers for logs.

use std::error::Error as StdError;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

/// Boxed error accepted from user fetch functions.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// # Errors produced by notifiers.
///
/// Equality is structural: two `Failed` errors are equal when they share the
/// same allocation or render the same message.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum NotifierError {
    /// Data was requested but none is available and no fallback was given.
    #[error("no data available")]
    NoData,

    /// The refresh was superseded by a newer one or cancelled explicitly.
    #[error("operation cancelled")]
    Cancelled,

    /// The notifier was disposed before or during the operation.
    #[error("notifier disposed")]
    Disposed,

    /// An async operation was started outside a Tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Error raised by a user fetch function, kept verbatim.
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),
}

impl NotifierError {
    /// Wraps an arbitrary error.
    ///
    /// A boxed `NotifierError` is unwrapped back into its own variant, so a
    /// fetch function returning `NotifierError::Cancelled` still counts as a
    /// cancellation.
    ///
    /// # Example
    /// ```
    /// use fetchcell::NotifierError;
    ///
    /// let err = NotifierError::failed("boom");
    /// assert_eq!(err.as_label(), "failed");
    /// assert_eq!(err.to_string(), "boom");
    ///
    /// let inner = NotifierError::failed(NotifierError::Cancelled);
    /// assert!(inner.is_cancelled());
    /// ```
    pub fn failed(err: impl Into<BoxError>) -> Self {
        match err.into().downcast::<NotifierError>() {
            Ok(own) => *own,
            Err(other) => NotifierError::Failed(Arc::from(other)),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            NotifierError::NoData => "no_data",
            NotifierError::Cancelled => "cancelled",
            NotifierError::Disposed => "disposed",
            NotifierError::NoRuntime => "no_runtime",
            NotifierError::Failed(_) => "failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            NotifierError::Failed(err) => format!("failed: {err}"),
            other => other.to_string(),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NotifierError::Cancelled)
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        matches!(self, NotifierError::Disposed)
    }

    #[inline]
    pub fn is_no_data(&self) -> bool {
        matches!(self, NotifierError::NoData)
    }
}

impl PartialEq for NotifierError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NotifierError::Failed(a), NotifierError::Failed(b)) => {
                Arc::ptr_eq(a, b) || a.to_string() == b.to_string()
            }
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for NotifierError {}

impl Hash for NotifierError {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        if let NotifierError::Failed(err) = self {
            err.to_string().hash(state);
        }
    }
}
