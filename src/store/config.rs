//! # Keyed store configuration.
//!
//! ## Sentinel values
//! - `sweep_interval = 0s` → no idle eviction (entries live until removed or cleared)

use std::time::Duration;

/// Settings of a [`KeyedStore`](crate::KeyedStore).
///
/// ## Field semantics
/// - `sweep_interval`: period of the idle-eviction sweep (`0s` = never sweep)
/// - `bus_capacity`: lifecycle event ring buffer size (min 1; clamped)
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// How often stale, unobserved entries are evicted.
    ///
    /// The sweep only runs while the store has result listeners and entries.
    pub sweep_interval: Duration,

    /// Capacity of the lifecycle event broadcast channel.
    ///
    /// Receivers lagging more than `bus_capacity` events observe `Lagged`.
    pub bus_capacity: usize,
}

impl StoreConfig {
    /// Returns the sweep interval as an `Option`.
    ///
    /// - `None` → idle eviction disabled
    /// - `Some(d)` → sweep every `d`
    #[inline]
    pub fn sweep_period(&self) -> Option<Duration> {
        if self.sweep_interval == Duration::ZERO {
            None
        } else {
            Some(self.sweep_interval)
        }
    }

    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

impl Default for StoreConfig {
    /// - `sweep_interval = 60s`
    /// - `bus_capacity = 256`
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            bus_capacity: 256,
        }
    }
}
