//! Temporary bans and the rule that imposes them.

use std::time::{Duration, Instant};

use super::window::WindowStats;
use crate::config::BanConfig;
use crate::error::Result;

/// An active or expired ban on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanEntry {
    /// When the ban was imposed
    pub banned_at: Instant,
    /// First instant at which the entity is admitted again
    pub expires_at: Instant,
}

impl BanEntry {
    /// Whether the ban still applies at `now`.
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// The abuse rule: ban an entity whose recent reject ratio is too high.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BanRule {
    threshold: f64,
    min_samples: usize,
    duration: Duration,
}

impl BanRule {
    /// Build the rule, failing if the ban duration is out of range.
    pub fn new(config: &BanConfig) -> Result<Self> {
        Ok(Self {
            threshold: config.threshold,
            min_samples: config.min_samples,
            duration: config.duration()?,
        })
    }

    /// Whether the window statistics warrant a ban.
    pub fn should_ban(&self, stats: &WindowStats) -> bool {
        stats.samples >= self.min_samples && stats.reject_ratio() >= self.threshold
    }

    /// A fresh ban starting at `now`, or `None` if its expiry is not a
    /// representable instant.
    pub fn impose(&self, now: Instant) -> Option<BanEntry> {
        Some(BanEntry {
            banned_at: now,
            expires_at: now.checked_add(self.duration)?,
        })
    }

    /// How long a ban lasts.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn rule() -> BanRule {
        BanRule::new(&BanConfig::default()).unwrap()
    }

    #[test]
    fn test_bans_at_threshold_with_enough_samples() {
        let stats = WindowStats {
            samples: 5,
            rejected: 3,
        };
        assert!(rule().should_ban(&stats));
    }

    #[test]
    fn test_no_ban_below_min_samples() {
        let stats = WindowStats {
            samples: 4,
            rejected: 4,
        };
        assert!(!rule().should_ban(&stats));
    }

    #[test]
    fn test_no_ban_below_threshold() {
        let stats = WindowStats {
            samples: 10,
            rejected: 5,
        };
        assert!(!rule().should_ban(&stats));
    }

    #[test]
    fn test_ban_expiry() {
        let clock = ManualClock::new();
        let entry = rule().impose(clock.now()).unwrap();

        assert!(entry.expires_at > entry.banned_at);
        assert!(entry.is_active(clock.now()));
        assert_eq!(entry.remaining(clock.now()), Duration::from_secs(10));

        clock.advance_secs(9.5);
        assert!(entry.is_active(clock.now()));

        clock.advance_secs(0.5);
        assert!(!entry.is_active(clock.now()));
        assert_eq!(entry.remaining(clock.now()), Duration::ZERO);
    }

    #[test]
    fn test_rule_rejects_out_of_range_duration() {
        let config = BanConfig {
            duration_secs: 1e300,
            ..BanConfig::default()
        };
        assert!(BanRule::new(&config).is_err());
    }
}
