//! Aggregation of the request log into a per-entity report.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::log::RequestLog;
use crate::admission::Reason;

const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Decision counts for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityReport {
    /// Admitted requests
    pub allowed: u64,
    /// Rejected requests
    pub rejected: u64,
    /// `rejected / (allowed + rejected)`
    pub reject_rate: f64,
    /// Rejections while banned
    pub banned: u64,
    /// Rejections by the global limiter
    pub global_limit: u64,
    /// Rejections by the entity's own bucket
    pub entity_limit: u64,
}

impl EntityReport {
    fn add(&mut self, reason: Reason) {
        match reason {
            Reason::Ok => self.allowed += 1,
            Reason::Banned => self.banned += 1,
            Reason::GlobalLimit => self.global_limit += 1,
            Reason::EntityLimit => self.entity_limit += 1,
        }
        if reason != Reason::Ok {
            self.rejected += 1;
        }
    }

    fn total(&self) -> u64 {
        self.allowed + self.rejected
    }
}

/// Decision counts for one wall-clock minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinuteReport {
    /// Admitted requests
    pub allowed: u64,
    /// Rejected requests
    pub rejected: u64,
}

/// Summary of a request log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    /// Decisions analysed
    pub total: u64,
    /// Admitted decisions
    pub allowed: u64,
    /// Rejected decisions
    pub rejected: u64,
    /// Decisions evicted from the log before analysis
    pub dropped: u64,
    /// Per-entity breakdown, ordered by entity id
    pub entities: BTreeMap<String, EntityReport>,
    /// Per-minute breakdown, keyed `YYYY-MM-DD HH:MM` in UTC
    pub per_minute: BTreeMap<String, MinuteReport>,
}

/// Summarize every retained entry of `log`.
pub fn analyze(log: &RequestLog) -> Report {
    let mut report = Report {
        dropped: log.dropped(),
        ..Report::default()
    };

    for entry in log.entries() {
        let reason = entry.decision.reason;
        report.total += 1;

        report
            .entities
            .entry(entry.entity.clone())
            .or_default()
            .add(reason);

        let minute = report
            .per_minute
            .entry(entry.timestamp.format(MINUTE_FORMAT).to_string())
            .or_default();
        if entry.decision.allowed {
            report.allowed += 1;
            minute.allowed += 1;
        } else {
            report.rejected += 1;
            minute.rejected += 1;
        }
    }

    for stats in report.entities.values_mut() {
        let total = stats.total();
        stats.reject_rate = if total == 0 {
            0.0
        } else {
            stats.rejected as f64 / total as f64
        };
    }

    report
}

impl Report {
    /// Render the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Request Analysis ===")?;
        for (entity, stats) in &self.entities {
            writeln!(
                f,
                "user={} allowed={} rejected={} reject_rate={:.2}% (banned={} global={} entity={})",
                entity,
                stats.allowed,
                stats.rejected,
                stats.reject_rate * 100.0,
                stats.banned,
                stats.global_limit,
                stats.entity_limit,
            )?;
        }

        if !self.per_minute.is_empty() {
            writeln!(f)?;
            writeln!(f, "Decisions per minute:")?;
            for (minute, counts) in &self.per_minute {
                writeln!(
                    f,
                    "{} -> allowed={} rejected={}",
                    minute, counts.allowed, counts.rejected
                )?;
            }
        }

        writeln!(f)?;
        writeln!(
            f,
            "Total: {} allowed, {} rejected",
            self.allowed, self.rejected
        )?;
        if self.dropped > 0 {
            writeln!(f, "Dropped from log: {}", self.dropped)?;
        }

        writeln!(f)?;
        writeln!(f, "Interpretation:")?;
        writeln!(f, "- Token bucket allows bursts, then recovers.")?;
        writeln!(f, "- Leaky bucket smooths traffic, rejects bursts.")?;
        write!(f, "- Per-user isolation prevents noisy neighbors.")
    }
}
