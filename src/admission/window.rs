//! Sliding-window outcome tracking for abuse detection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts of recent outcomes within the window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    /// Number of outcomes still inside the window
    pub samples: usize,
    /// Number of those outcomes that were rejections
    pub rejected: usize,
}

impl WindowStats {
    /// Fraction of samples that were rejected, `0.0` when empty.
    pub fn reject_ratio(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.rejected as f64 / self.samples as f64
        }
    }
}

/// Per-entity bounded history of recent admission outcomes.
///
/// Entries older than the window are pruned before every read, so an entity
/// that stops misbehaving recovers as the window slides.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    events: VecDeque<(Instant, bool)>,
    rejected: usize,
}

impl SlidingWindow {
    /// Create an empty tracker with the given window length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
            rejected: 0,
        }
    }

    /// Record one outcome observed at `now`.
    pub fn record(&mut self, now: Instant, allowed: bool) {
        self.prune(now);
        // Keep insertion chronological even if the clock stepped back.
        let at = match self.events.back() {
            Some(&(last, _)) if last > now => last,
            _ => now,
        };
        self.events.push_back((at, allowed));
        if !allowed {
            self.rejected += 1;
        }
    }

    /// Prune expired entries and return the current counts.
    pub fn reject_rate(&mut self, now: Instant) -> WindowStats {
        self.prune(now);
        WindowStats {
            samples: self.events.len(),
            rejected: self.rejected,
        }
    }

    /// Counts as of `now` without pruning.
    pub fn peek(&self, now: Instant) -> WindowStats {
        let horizon = now.checked_sub(self.window);
        let live = self
            .events
            .iter()
            .filter(|(at, _)| horizon.map_or(true, |h| *at >= h));

        let mut stats = WindowStats::default();
        for (_, allowed) in live {
            stats.samples += 1;
            if !allowed {
                stats.rejected += 1;
            }
        }
        stats
    }

    /// Number of retained entries, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let Some(horizon) = now.checked_sub(self.window) else {
            return;
        };

        while let Some(&(at, allowed)) = self.events.front() {
            if at >= horizon {
                break;
            }
            self.events.pop_front();
            if !allowed {
                self.rejected -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    #[test]
    fn test_empty_window_ratio_is_zero() {
        let clock = ManualClock::new();
        let mut window = SlidingWindow::new(Duration::from_secs(30));

        let stats = window.reject_rate(clock.now());
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.reject_ratio(), 0.0);
    }

    #[test]
    fn test_reject_ratio() {
        let clock = ManualClock::new();
        let mut window = SlidingWindow::new(Duration::from_secs(30));

        window.record(clock.now(), true);
        window.record(clock.now(), true);
        window.record(clock.now(), false);
        window.record(clock.now(), false);
        window.record(clock.now(), false);

        let stats = window.reject_rate(clock.now());
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.rejected, 3);
        assert!((stats.reject_ratio() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_old_entries_are_pruned() {
        let clock = ManualClock::new();
        let mut window = SlidingWindow::new(Duration::from_secs(30));

        window.record(clock.now(), false);
        window.record(clock.now(), false);
        clock.advance_secs(20.0);
        window.record(clock.now(), true);

        // Exactly at the horizon the first entries are still inside
        clock.advance_secs(10.0);
        assert_eq!(window.reject_rate(clock.now()).samples, 3);

        clock.advance_secs(0.5);
        let stats = window.reject_rate(clock.now());
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.rejected, 0);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_peek_does_not_prune() {
        let clock = ManualClock::new();
        let mut window = SlidingWindow::new(Duration::from_secs(1));

        window.record(clock.now(), false);
        clock.advance_secs(2.0);

        assert_eq!(window.peek(clock.now()).samples, 0);
        assert_eq!(window.len(), 1);

        window.reject_rate(clock.now());
        assert!(window.is_empty());
    }

    #[test]
    fn test_insertion_stays_chronological_on_clock_rewind() {
        let clock = ManualClock::new();
        clock.advance_secs(10.0);
        let mut window = SlidingWindow::new(Duration::from_secs(5));

        window.record(clock.now(), false);
        clock.rewind(Duration::from_secs(3));
        window.record(clock.now(), true);

        clock.advance_secs(3.0);
        let stats = window.reject_rate(clock.now());
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.rejected, 1);
    }
}
