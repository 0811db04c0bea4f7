//! Result data model: the [`AsyncResult`] union, its [`Phase`] view and [`Timestamp`].

mod async_result;
mod timestamp;

pub use async_result::{AsyncResult, Phase};
pub use timestamp::Timestamp;

/// Bound shared by every value a notifier can hold.
pub trait Value: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + PartialEq + Send + Sync + 'static {}
