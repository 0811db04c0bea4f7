//! # Keyed notifier cache.
//!
//! - [`KeyedStore`] creates notifiers per key, republishes their results and evicts idle ones
//! - [`StoreConfig`] sets the sweep period and event bus capacity
//! - [`StoreEvent`] / [`StoreEventKind`] describe entry lifecycle changes

mod bus;
mod config;
mod event;
mod keyed;

pub use config::StoreConfig;
pub use event::{StoreEvent, StoreEventKind};
pub use keyed::KeyedStore;
