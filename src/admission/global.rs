//! Aggregate throughput gate shared by all entities.

use parking_lot::Mutex;
use std::time::Instant;

use super::bucket::{Allowance, Bucket, BucketAlgorithm};
use crate::config::{Algorithm, BucketConfig};

/// A single shared bucket consulted before any per-entity accounting.
///
/// Every request that reaches it spends global capacity, whatever the
/// per-entity outcome turns out to be.
pub struct GlobalLimiter {
    bucket: Mutex<BucketAlgorithm>,
}

impl GlobalLimiter {
    /// Create the global limiter.
    pub fn new(algorithm: Algorithm, config: BucketConfig, now: Instant) -> Self {
        Self {
            bucket: Mutex::new(BucketAlgorithm::new(algorithm, config, now)),
        }
    }

    /// Spend one unit of global capacity.
    pub fn allow(&self, now: Instant) -> Allowance {
        self.bucket.lock().allow(now)
    }

    /// Current global level.
    pub fn level(&self) -> f64 {
        self.bucket.lock().level()
    }

    /// Configured global capacity.
    pub fn capacity(&self) -> f64 {
        self.bucket.lock().capacity()
    }
}
