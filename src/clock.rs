//! Time base shared by kernel buffer timestamps and the frame timeline.
//!
//! Kernel capture completions carry an end-of-DMA timestamp taken on
//! `CLOCK_MONOTONIC`. The timeline predicts start-of-exposure instants on the
//! same axis, so everything here is a nanosecond count on that clock:
//! [`ClockTime`] for instants, a signed nanosecond offset for the IPA's
//! exposure-timing corrections, and a [`Clock`] capability trait so tests can
//! drive time by hand.

use std::time::Duration;

use rustix::time::{clock_gettime, ClockId};

/// Time in nanoseconds on the monotonic clock (8 bytes, Copy).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Get as nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Saturating addition.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction (clamps at zero).
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Checked subtraction. Returns `None` on underflow.
    #[inline]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Multiply by a scalar.
    #[inline]
    pub const fn saturating_mul(self, rhs: u64) -> Self {
        Self(self.0.saturating_mul(rhs))
    }

    /// Apply a signed nanosecond offset, clamping at zero.
    ///
    /// Offsets come from the IPA's estimate of the delta between end-of-DMA
    /// and start-of-exposure and may be negative.
    #[inline]
    pub const fn offset_by(self, offset_ns: i64) -> Self {
        if offset_ns >= 0 {
            Self(self.0.saturating_add(offset_ns as u64))
        } else {
            Self(self.0.saturating_sub(offset_ns.unsigned_abs()))
        }
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(d.as_nanos() as u64)
    }
}

impl From<ClockTime> for Duration {
    #[inline]
    fn from(t: ClockTime) -> Self {
        Duration::from_nanos(t.0)
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let ms = (self.0 / 1_000_000) % 1000;
        write!(f, "{}.{:03}s", secs, ms)
    }
}

/// A clock that provides the current time.
///
/// The production implementation reads `CLOCK_MONOTONIC`; tests substitute a
/// manually advanced clock to make timeline behavior deterministic.
pub trait Clock {
    /// Get the current time.
    fn now(&self) -> ClockTime;
}

/// `CLOCK_MONOTONIC` as reported by the kernel.
///
/// This is the clock kernel video devices stamp dequeued buffers with, so
/// values from [`MonotonicClock::now`] compare directly against buffer
/// timestamps.
#[derive(Debug, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a new monotonic clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> ClockTime {
        let ts = clock_gettime(ClockId::Monotonic);
        ClockTime::from_nanos(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_creation() {
        assert_eq!(ClockTime::from_nanos(1_000).nanos(), 1_000);
        assert_eq!(ClockTime::from_millis(1_000).nanos(), 1_000_000_000);
        assert_eq!(ClockTime::from_millis(1_500).millis(), 1_500);
    }

    #[test]
    fn test_clock_time_arithmetic() {
        let t1 = ClockTime::from_millis(1_000);
        let t2 = ClockTime::from_millis(400);

        assert_eq!((t1 + t2).millis(), 1_400);
        assert_eq!((t1 - t2).millis(), 600);

        // Subtraction saturates at zero.
        assert_eq!(t2 - t1, ClockTime::ZERO);
        assert_eq!(t2.checked_sub(t1), None);
    }

    #[test]
    fn test_clock_time_signed_offset() {
        let t = ClockTime::from_millis(10);

        assert_eq!(t.offset_by(2_000_000).millis(), 12);
        assert_eq!(t.offset_by(-2_000_000).millis(), 8);

        // Negative offsets clamp at zero rather than wrapping.
        assert_eq!(ClockTime::from_nanos(5).offset_by(-10), ClockTime::ZERO);
    }

    #[test]
    fn test_clock_time_display() {
        assert_eq!(format!("{}", ClockTime::from_millis(1_500)), "1.500s");
        assert_eq!(format!("{}", ClockTime::ZERO), "0.000s");
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}
