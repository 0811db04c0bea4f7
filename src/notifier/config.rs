//! # Notifier cache and refresh policy.
//!
//! Provides [`NotifierConfig`], the policy knobs shared by plain notifiers,
//! derived notifiers and keyed-store factories.
//!
//! ## Sentinel values
//! - `expiration = 0s` → data never expires (fresh until invalidated)

use std::time::Duration;

/// Cache and refresh policy of a notifier.
///
/// ## Field semantics
/// - `expiration`: age after which `Data` is stale (`0s` = never)
/// - `auto_reset_when_unobserved`: drop data and return to `Initial` when the last listener leaves
/// - `refresh_on_error`: a non-forced refresh retries after a (non-cancelled) error
///
/// ## Notes
/// All fields are public. Prefer [`NotifierConfig::expires_after`] over checking the sentinel.
#[derive(Clone, Debug, Default)]
pub struct NotifierConfig {
    /// How long fetched data stays fresh.
    ///
    /// - `Duration::ZERO` = never expires
    /// - `> 0` = `Data` older than this is stale and is refetched on demand
    pub expiration: Duration,

    /// Reset to `Initial` (data discarded) once the last listener is removed.
    pub auto_reset_when_unobserved: bool,

    /// Let a non-forced refresh retry when the current state is a user error.
    pub refresh_on_error: bool,
}

impl NotifierConfig {
    /// Returns the expiration as an `Option`.
    ///
    /// - `None` → data stays fresh until explicitly invalidated
    /// - `Some(d)` → data older than `d` is stale
    #[inline]
    pub fn expires_after(&self) -> Option<Duration> {
        if self.expiration == Duration::ZERO {
            None
        } else {
            Some(self.expiration)
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    #[must_use]
    pub fn with_auto_reset(mut self, enabled: bool) -> Self {
        self.auto_reset_when_unobserved = enabled;
        self
    }

    #[must_use]
    pub fn with_refresh_on_error(mut self, enabled: bool) -> Self {
        self.refresh_on_error = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_expiration_means_never() {
        assert_eq!(NotifierConfig::default().expires_after(), None);
        let cfg = NotifierConfig::default().with_expiration(Duration::from_millis(100));
        assert_eq!(cfg.expires_after(), Some(Duration::from_millis(100)));
    }
}
