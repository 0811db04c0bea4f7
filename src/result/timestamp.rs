use std::time::Duration;

use tokio::time::Instant;

/// Point in time a result was last confirmed.
///
/// Backed by [`tokio::time::Instant`], so a paused test clock drives expiration.
/// [`Timestamp::EPOCH`] orders before every real instant and is always stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(Option<Instant>);

impl Timestamp {
    /// Epoch zero: "never updated".
    pub const EPOCH: Timestamp = Timestamp(None);

    #[inline]
    pub fn now() -> Self {
        Self(Some(Instant::now()))
    }

    #[inline]
    pub fn is_epoch(&self) -> bool {
        self.0.is_none()
    }

    /// Time since this stamp, `None` for [`Timestamp::EPOCH`].
    #[inline]
    pub fn elapsed(&self) -> Option<Duration> {
        self.0.map(|at| at.elapsed())
    }

    /// Returns `true` if at least `age` has passed since this stamp.
    ///
    /// The epoch is older than any age.
    pub fn is_older_than(&self, age: Duration) -> bool {
        self.elapsed().map_or(true, |elapsed| elapsed >= age)
    }
}

impl From<Instant> for Timestamp {
    fn from(at: Instant) -> Self {
        Self(Some(at))
    }
}
