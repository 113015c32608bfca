//! Token and leaky bucket implementations.

use std::collections::VecDeque;
use std::time::Instant;

use crate::clock::elapsed_secs;
use crate::config::{Algorithm, BucketConfig};

/// Outcome of a single bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allowance {
    /// Whether one unit of demand was admitted
    pub allowed: bool,
    /// Advisory wait before the next unit can be admitted, zero when allowed
    pub retry_after_secs: f64,
}

impl Allowance {
    fn granted() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0.0,
        }
    }

    fn denied(retry_after_secs: f64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_secs.max(0.0),
        }
    }
}

/// Resource accounting primitive shared by both bucket variants.
///
/// Implementations are not internally synchronized; callers serialize access
/// so that the refill/consume sequence of `allow` is atomic.
pub trait Bucket: Send {
    /// Try to admit one unit of demand at `now`.
    fn allow(&mut self, now: Instant) -> Allowance;

    /// Current stored units (tokens, or queued entries).
    fn level(&self) -> f64;

    /// Maximum stored units.
    fn capacity(&self) -> f64;

    /// Units refilled or drained per second.
    fn rate(&self) -> f64;
}

/// Bursty-then-smoothed admission.
///
/// Starts full; refills continuously at `rate` tokens per second up to
/// `capacity`. Each admission consumes one token.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Create a full token bucket.
    pub fn new(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            rate,
            tokens: capacity,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = elapsed_secs(self.last_update, now);
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        if now > self.last_update {
            self.last_update = now;
        }
    }
}

impl Bucket for TokenBucket {
    fn allow(&mut self, now: Instant) -> Allowance {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Allowance::granted()
        } else {
            Allowance::denied((1.0 - self.tokens) / self.rate)
        }
    }

    fn level(&self) -> f64 {
        self.tokens
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }

    fn rate(&self) -> f64 {
        self.rate
    }
}

/// Strict-ceiling smoothing.
///
/// Admissions are queued up to `capacity` and drained in whole units at
/// `rate` per second; a burst is never granted faster than the drain.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    capacity: f64,
    rate: f64,
    queue: VecDeque<Instant>,
    last_leak: Instant,
}

impl LeakyBucket {
    /// Create an empty leaky bucket.
    pub fn new(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            rate,
            queue: VecDeque::new(),
            last_leak: now,
        }
    }

    /// Number of queued admissions.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn leak(&mut self, now: Instant) {
        let leaked = (elapsed_secs(self.last_leak, now) * self.rate).floor();
        if leaked < 1.0 {
            // Sub-unit progress stays in the accumulator.
            return;
        }

        let drained = self.queue.len().min(leaked as usize);
        self.queue.drain(..drained);
        self.last_leak = now;
    }
}

impl Bucket for LeakyBucket {
    fn allow(&mut self, now: Instant) -> Allowance {
        self.leak(now);

        // Admit only if the queue still fits within a fractional capacity.
        if ((self.queue.len() + 1) as f64) <= self.capacity {
            self.queue.push_back(now);
            Allowance::granted()
        } else {
            Allowance::denied(1.0 / self.rate)
        }
    }

    fn level(&self) -> f64 {
        self.queue.len() as f64
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }

    fn rate(&self) -> f64 {
        self.rate
    }
}

/// A bucket of either variant, selected once at construction.
#[derive(Debug, Clone)]
pub enum BucketAlgorithm {
    /// Token bucket variant
    Token(TokenBucket),
    /// Leaky bucket variant
    Leaky(LeakyBucket),
}

impl BucketAlgorithm {
    /// Build a bucket of the given algorithm.
    pub fn new(algorithm: Algorithm, config: BucketConfig, now: Instant) -> Self {
        match algorithm {
            Algorithm::Token => {
                BucketAlgorithm::Token(TokenBucket::new(config.capacity, config.rate, now))
            }
            Algorithm::Leaky => {
                BucketAlgorithm::Leaky(LeakyBucket::new(config.capacity, config.rate, now))
            }
        }
    }

    /// The algorithm this bucket implements.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            BucketAlgorithm::Token(_) => Algorithm::Token,
            BucketAlgorithm::Leaky(_) => Algorithm::Leaky,
        }
    }
}

impl Bucket for BucketAlgorithm {
    fn allow(&mut self, now: Instant) -> Allowance {
        match self {
            BucketAlgorithm::Token(b) => b.allow(now),
            BucketAlgorithm::Leaky(b) => b.allow(now),
        }
    }

    fn level(&self) -> f64 {
        match self {
            BucketAlgorithm::Token(b) => b.level(),
            BucketAlgorithm::Leaky(b) => b.level(),
        }
    }

    fn capacity(&self) -> f64 {
        match self {
            BucketAlgorithm::Token(b) => b.capacity(),
            BucketAlgorithm::Leaky(b) => b.capacity(),
        }
    }

    fn rate(&self) -> f64 {
        match self {
            BucketAlgorithm::Token(b) => b.rate(),
            BucketAlgorithm::Leaky(b) => b.rate(),
        }
    }
}
