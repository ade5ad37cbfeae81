use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// A dual-timebase instant.
///
/// Pairs a monotonic reading (used for all duration math, immune to wall
/// clock adjustments) with a wall-clock reading (used for human-readable
/// timestamps in emitted events). Comparison and equality use the
/// monotonic half only.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    monotonic: Instant,
    wall: DateTime<Utc>,
}

impl Timestamp {
    /// Captures the current instant on both timebases.
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Utc::now(),
        }
    }

    /// Returns the monotonic reading.
    pub fn monotonic(&self) -> Instant {
        self.monotonic
    }

    /// Returns the wall-clock reading.
    pub fn wall(&self) -> DateTime<Utc> {
        self.wall
    }

    /// Returns the duration elapsed since an earlier timestamp.
    ///
    /// Saturates to zero if `earlier` is actually later than `self`.
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        self.monotonic.saturating_duration_since(earlier.monotonic)
    }

    /// Returns the duration elapsed since this timestamp was captured.
    pub fn elapsed(&self) -> Duration {
        self.monotonic.elapsed()
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.monotonic == other.monotonic
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.monotonic.cmp(&other.monotonic)
    }
}
