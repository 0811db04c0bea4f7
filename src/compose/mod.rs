//! # Derived notifiers.
//!
//! A derived notifier subscribes to its sources when it is created and
//! recomputes on every source transition:
//!
//! - [`Notifier::combine_latest`] / [`combine_all`]: several sources, one sync function
//! - [`Notifier::effect`]: one source, sync function
//! - [`Notifier::async_effect`]: one source, async function under the fetch protocol
//! - [`Notifier::stream_effect`]: one source, stream bound per source value
//!
//! Derived notifiers only read their sources. Dropping (or disposing) the
//! derived notifier releases its source subscriptions.

mod combine;
mod dependency;
mod effect;

pub use combine::combine_all;

use crate::notifier::NotifierConfig;

/// Options of a derived notifier.
///
/// - `ignore_loading`: a loading source does not turn the derived value into `Loading`
/// - `config`: cache policy of the derived notifier itself
#[derive(Clone, Debug, Default)]
pub struct ComposeOptions {
    pub ignore_loading: bool,
    pub config: NotifierConfig,
}

impl ComposeOptions {
    #[must_use]
    pub fn with_ignore_loading(mut self, enabled: bool) -> Self {
        self.ignore_loading = enabled;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: NotifierConfig) -> Self {
        self.config = config;
        self
    }
}
