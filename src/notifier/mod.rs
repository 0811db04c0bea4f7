//! # Notifier core and fetch coordination.
//!
//! - [`Notifier`] holds one [`AsyncResult`](crate::AsyncResult), notifies listeners and refreshes on demand
//! - [`NotifierConfig`] is its cache and refresh policy
//! - [`Fetch`] / [`FetchFn`] produce data; [`FetchContext`] tells a fetch whether it is still current
//! - [`Subscription`] removes a listener when dropped

mod builder;
mod config;
mod core;
mod fetch;
mod listeners;
mod stream;

pub use builder::NotifierBuilder;
pub use config::NotifierConfig;
pub use self::core::{Notifier, WeakNotifier};
pub use fetch::{Fetch, FetchContext, FetchFn, FetchTask};
pub use listeners::{ListenerId, Subscription};

pub(crate) use fetch::Outcome;
pub(crate) use listeners::call_isolated;
