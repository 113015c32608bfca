//! Monotonic time sources.
//!
//! Every component of the engine takes the current instant as an argument;
//! only the [`AdmissionController`](crate::admission::AdmissionController)
//! reads the clock, once per decision.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Clock trait for abstracting time operations.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock for tests and deterministic replays.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    current: Mutex<Instant>,
}

impl ManualClock {
    /// Create a manual clock frozen at the current instant.
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            current: Mutex::new(origin),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }

    /// Advance the clock by a fractional number of seconds.
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }

    /// Move the clock so that `offset` has elapsed since creation.
    ///
    /// Returns the new instant, or `None` without moving the clock if
    /// `origin + offset` is not representable.
    pub fn set_offset(&self, offset: Duration) -> Option<Instant> {
        let target = self.origin.checked_add(offset)?;
        *self.current.lock() = target;
        Some(target)
    }

    /// Move the clock backwards, never before its creation instant.
    pub fn rewind(&self, duration: Duration) {
        let mut current = self.current.lock();
        *current = current.checked_sub(duration).unwrap_or(self.origin).max(self.origin);
    }

    /// Time elapsed since the clock was created.
    pub fn offset(&self) -> Duration {
        self.current.lock().saturating_duration_since(self.origin)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

/// Seconds elapsed between `earlier` and `now`, clamped to zero if the clock
/// went backward.
pub(crate) fn elapsed_secs(earlier: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(earlier).as_secs_f64()
}
