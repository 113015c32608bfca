//! Bounded history of admission decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::admission::Decision;
use crate::config::LogConfig;

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Wall-clock time of the decision
    pub timestamp: DateTime<Utc>,
    /// Entity the decision was made for
    pub entity: String,
    /// The decision itself
    pub decision: Decision,
}

/// Ring buffer of the most recent decisions.
///
/// Once `capacity` entries are held, each new entry evicts the oldest.
#[derive(Debug, Clone)]
pub struct RequestLog {
    capacity: usize,
    entries: VecDeque<LogEntry>,
    dropped: u64,
}

impl RequestLog {
    /// Create an empty log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            dropped: 0,
        }
    }

    /// Create a log from validated configuration.
    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Record a decision made now.
    pub fn record(&mut self, entity: &str, decision: Decision) {
        self.record_at(Utc::now(), entity, decision);
    }

    /// Record a decision with an explicit timestamp.
    pub fn record_at(&mut self, timestamp: DateTime<Utc>, entity: &str, decision: Decision) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(LogEntry {
            timestamp,
            entity: entity.to_string(),
            decision,
        });
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded (or everything was evicted).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries evicted to respect the bound.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
