//! Version allocation and time sources.
//!
//! - **Version clock**: a per-session logical counter. Every accepted operation
//!   takes the next value, so committed versions form a gap-free total order.
//! - **Time sources**: wall-clock time is read through the [`TimeSource`] trait so
//!   expiry and idle decisions can be driven deterministically in tests.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Monotonic per-session version counter.
///
/// Version 0 is the document as loaded when the session was created; the first
/// committed operation produces version 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionClock {
    counter: u64,
}

impl VersionClock {
    /// Creates a clock at version 0.
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Creates a clock resuming from a previously allocated version.
    pub fn with_value(value: u64) -> Self {
        Self { counter: value }
    }

    /// Returns the latest allocated version without allocating.
    pub fn current(&self) -> u64 {
        self.counter
    }

    /// Allocates the next version. Exactly one greater than the previous value.
    pub fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

impl fmt::Display for VersionClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.counter)
    }
}

/// Source of wall-clock time.
pub trait TimeSource: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for tests and simulations.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualTimeSource {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Create a clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared handle to a time source.
pub type SharedTimeSource = Arc<dyn TimeSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_clock_starts_at_zero() {
        let clock = VersionClock::new();
        assert_eq!(clock.current(), 0);
    }

    #[test]
    fn test_version_clock_next_is_gap_free() {
        let mut clock = VersionClock::new();
        let versions: Vec<u64> = (0..100).map(|_| clock.next()).collect();
        let expected: Vec<u64> = (1..=100).collect();
        assert_eq!(versions, expected);
        assert_eq!(clock.current(), 100);
    }

    #[test]
    fn test_version_clock_resume() {
        let mut clock = VersionClock::with_value(41);
        assert_eq!(clock.next(), 42);
        assert_eq!(clock.to_string(), "v42");
    }

    #[test]
    fn test_manual_time_source_advance() {
        let start = Utc::now();
        let time = ManualTimeSource::new(start);
        let shared = time.clone();

        time.advance(Duration::seconds(90));
        assert_eq!(shared.now(), start + Duration::seconds(90));

        shared.set(start);
        assert_eq!(time.now(), start);
    }

    #[test]
    fn test_system_time_source_moves_forward() {
        let source = SystemTimeSource;
        let a = source.now();
        let b = source.now();
        assert!(b >= a);
    }
}
