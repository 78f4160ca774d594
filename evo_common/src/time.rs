//! Monotonic time helpers and absolute deadlines.
//!
//! Blocking non-RT calls take a [`Deadline`] rather than a relative timeout so
//! that retries inside a loop never extend the total wait.

use nix::time::{ClockId, clock_gettime};
use std::time::{Duration, Instant};

/// Current `CLOCK_MONOTONIC` reading in nanoseconds.
///
/// Same clock domain as the kernel futex timeouts and safe to call from RT
/// code (vDSO, no allocation).
#[inline]
pub fn monotonic_ns() -> i64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as i64 * 1_000_000_000 + ts.tv_nsec() as i64,
        Err(_) => 0,
    }
}

/// Absolute point in time after which a blocking call gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Deadline {
    /// Wait at most until the given instant.
    At(Instant),
    /// Never time out.
    #[default]
    Infinite,
}

impl Deadline {
    /// Deadline `timeout` from now. Saturates to [`Deadline::Infinite`].
    pub fn after(timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or(Self::Infinite, Self::At)
    }

    /// Deadline that has already passed. Turns blocking calls into polls.
    pub fn now() -> Self {
        Self::At(Instant::now())
    }

    /// Time left before expiry. `None` for an infinite deadline,
    /// `Some(Duration::ZERO)` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::At(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }

    /// Whether the deadline has passed.
    pub fn has_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }
}

impl From<Instant> for Deadline {
    fn from(at: Instant) -> Self {
        Self::At(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ns_does_not_go_backwards() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn infinite_never_expires() {
        assert_eq!(Deadline::Infinite.remaining(), None);
        assert!(!Deadline::Infinite.has_expired());
    }

    #[test]
    fn past_deadline_has_zero_remaining() {
        let deadline = Deadline::now();
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(deadline.has_expired());
    }

    #[test]
    fn min_prefers_finite() {
        let finite = Deadline::after(Duration::from_secs(1));
        assert_eq!(finite.min(Deadline::Infinite), finite);
        assert_eq!(Deadline::Infinite.min(finite), finite);
    }

    #[test]
    fn huge_timeout_saturates() {
        assert_eq!(Deadline::after(Duration::MAX), Deadline::Infinite);
    }
}
