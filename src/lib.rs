//! # fetchcell
//!
//! **fetchcell** is a reactive, cache-aware container for values that are
//! fetched asynchronously.
//!
//! A [`Notifier`] holds one [`AsyncResult`] (initial / loading / data / error),
//! tells listeners about every transition and refreshes itself through a user
//! fetch function when someone starts observing it or its data expires.
//! Derived notifiers combine or transform other notifiers, and a
//! [`KeyedStore`] caches notifiers per key and evicts idle ones.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐
//!     │ Fetch / Fn   │   │    Stream    │      user data sources
//!     └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼
//! ┌────────────────────────────────────────────────────────┐
//! │  Notifier<T>                                           │
//! │  - AsyncResult<T> (value + retained data + timestamp)  │
//! │  - generation token (discards superseded fetches)      │
//! │  - ListenerSet (FIFO dispatch, panic isolation)        │
//! │  - NotifierConfig (expiration, auto-reset, retry)      │
//! └──────┬──────────────────────────────┬──────────────────┘
//!        │ listen                       │ listen (store listener)
//!        ▼                              ▼
//! ┌──────────────────────┐   ┌────────────────────────────┐
//! │  Derived notifiers   │   │  KeyedStore<K, T>          │
//! │  combine_latest      │   │  - factory per key         │
//! │  combine_all         │   │  - on_result fan-out       │
//! │  effect / async /    │   │  - idle sweep + teardown   │
//! │  stream effects      │   │  - StoreEvent bus          │
//! └──────────────────────┘   └────────────────────────────┘
//! ```
//!
//! ### Refresh lifecycle
//! ```text
//! first listener ──► (next tick) refresh(false)
//!
//! refresh(force):
//!   ├─► needed? (force | Initial | stale Data | Cancelled | Error + refresh_on_error)
//!   ├─► generation += 1, cancel previous fetch token
//!   ├─► write Loading (keeps data, always notifies)
//!   ├─► spawn fetch(ctx)
//!   │       │
//!   │       ├─ disposed meanwhile ──► drop outcome, Err(Disposed)
//!   │       ├─ generation moved   ──► drop outcome, Err(Cancelled)
//!   │       └─ current            ──► write Data / Error (keeping data)
//!   └─► return FetchTask
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types                                  |
//! |-------------------|-----------------------------------------------------------|--------------------------------------------|
//! | **Result**        | Loading / data / error union with retained data.          | [`AsyncResult`], [`Phase`], [`Timestamp`]  |
//! | **Notifier**      | Listenable value with on-demand, expiring refresh.        | [`Notifier`], [`NotifierConfig`]           |
//! | **Fetching**      | Async data sources and cooperative cancellation.          | [`Fetch`], [`FetchFn`], [`FetchContext`]   |
//! | **Composition**   | Combine and transform notifiers.                          | [`combine_all`], [`ComposeOptions`]        |
//! | **Keyed store**   | Per-key notifier cache with idle eviction.                | [`KeyedStore`], [`StoreConfig`]            |
//! | **Errors**        | Typed errors stored in results and returned by async APIs.| [`NotifierError`]                          |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use fetchcell::{Notifier, NotifierConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), fetchcell::NotifierError> {
//!     let cfg = NotifierConfig::default().with_expiration(Duration::from_secs(60));
//!     let greeting = Notifier::builder(cfg)
//!         .on_fetch(|_ctx| async { Ok::<_, std::io::Error>("hello".to_string()) })
//!         .build();
//!
//!     let shout = greeting.effect(|s| s.to_uppercase())?;
//!     greeting.refresh_and_await(false, false).await?;
//!     assert_eq!(shout.data()?, "HELLO");
//!     Ok(())
//! }
//! ```

mod compose;
mod error;
mod notifier;
mod result;
mod store;

// ---- Public re-exports ----

pub use compose::{combine_all, ComposeOptions};
pub use error::{BoxError, NotifierError};
pub use notifier::{
    Fetch, FetchContext, FetchFn, FetchTask, ListenerId, Notifier, NotifierBuilder, NotifierConfig,
    Subscription, WeakNotifier,
};
pub use result::{AsyncResult, Phase, Timestamp, Value};
pub use store::{KeyedStore, StoreConfig, StoreEvent, StoreEventKind};
