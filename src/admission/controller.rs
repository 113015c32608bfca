//! Admission controller: ban check, global gate, entity bucket, abuse rule.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::ban::BanRule;
use super::bucket::Bucket;
use super::global::GlobalLimiter;
use super::registry::EntityRegistry;
use super::window::WindowStats;
use crate::clock::Clock;
use crate::config::{Algorithm, EngineConfig};
use crate::error::{FloodgateError, Result};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    /// Admitted
    Ok,
    /// Entity is serving a temporary ban
    Banned,
    /// Aggregate throughput ceiling reached
    GlobalLimit,
    /// Entity exhausted its own bucket
    EntityLimit,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::Ok => "ok",
            Reason::Banned => "banned",
            Reason::GlobalLimit => "global-limit",
            Reason::EntityLimit => "entity-limit",
        };
        f.write_str(s)
    }
}

/// The result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Advisory wait before retrying, zero when allowed
    pub retry_after_secs: f64,
    /// Which stage produced the decision
    pub reason: Reason,
}

impl Decision {
    fn admitted() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0.0,
            reason: Reason::Ok,
        }
    }

    fn rejected(reason: Reason, retry_after_secs: f64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_secs.max(0.0),
            reason,
        }
    }
}

/// Read-only view of one entity's accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity id
    pub entity: String,
    /// Requests admitted over the engine lifetime
    pub allowed_count: u64,
    /// Requests rejected over the engine lifetime, for any reason
    pub rejected_count: u64,
    /// `rejected_count / (allowed_count + rejected_count)`, `0.0` with no traffic
    pub reject_ratio: f64,
    /// Samples currently inside the abuse window
    pub window_samples: usize,
    /// Reject ratio inside the abuse window
    pub window_reject_ratio: f64,
    /// Current bucket level
    pub bucket_level: f64,
    /// Seconds of ban remaining, if banned
    pub banned_for_secs: Option<f64>,
}

impl EntitySnapshot {
    fn unseen(entity: &str, bucket_level: f64) -> Self {
        Self {
            entity: entity.to_string(),
            allowed_count: 0,
            rejected_count: 0,
            reject_ratio: 0.0,
            window_samples: 0,
            window_reject_ratio: 0.0,
            bucket_level,
            banned_for_secs: None,
        }
    }
}

/// The admission engine.
///
/// Owns the global limiter and every entity's state. Thread-safe: share it
/// behind an `Arc` and call [`admit`](Self::admit) from any number of threads.
pub struct AdmissionController {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    global: GlobalLimiter,
    entities: EntityRegistry,
    ban_rule: BanRule,
}

impl AdmissionController {
    /// Validate `config` and build an engine reading time from `clock`.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let now = clock.now();
        info!(
            algorithm = %config.algorithm,
            entity_capacity = config.entity.capacity,
            entity_rate = config.entity.rate,
            global_capacity = config.global.capacity,
            global_rate = config.global.rate,
            ban_threshold = config.ban.threshold,
            "Admission controller configured"
        );

        Ok(Self {
            global: GlobalLimiter::new(config.algorithm, config.global, now),
            entities: EntityRegistry::new(config.clone())?,
            ban_rule: BanRule::new(&config.ban)?,
            config,
            clock,
        })
    }

    /// Decide whether one request from `entity` is admitted.
    ///
    /// Returns `Err` only for malformed input; a rejection is a normal
    /// [`Decision`].
    pub fn admit(&self, entity: &str) -> Result<Decision> {
        let entity = validate_entity(entity)?;

        let now = self.clock.now();
        trace!(entity = %entity, "Checking admission");

        let slot = self.entities.get_or_create(entity, now);
        let mut state = slot.lock();

        if let Some(ban) = state.active_ban(now) {
            let remaining = ban.remaining(now).as_secs_f64();
            state.rejected_total += 1;
            trace!(entity = %entity, remaining_secs = remaining, "Entity is banned");
            return Ok(Decision::rejected(Reason::Banned, remaining));
        }

        let global = self.global.allow(now);
        if !global.allowed {
            state.rejected_total += 1;
            debug!(
                entity = %entity,
                retry_after_secs = global.retry_after_secs,
                "Global limit exceeded"
            );
            return Ok(Decision::rejected(Reason::GlobalLimit, global.retry_after_secs));
        }

        let allowance = state.bucket.allow(now);
        state.window.record(now, allowance.allowed);

        if allowance.allowed {
            state.allowed_total += 1;
            return Ok(Decision::admitted());
        }

        state.rejected_total += 1;
        let stats = state.window.reject_rate(now);
        debug!(
            entity = %entity,
            retry_after_secs = allowance.retry_after_secs,
            window_samples = stats.samples,
            window_reject_ratio = stats.reject_ratio(),
            "Entity limit exceeded"
        );

        if self.ban_rule.should_ban(&stats) {
            let duration_secs = self.ban_rule.duration().as_secs_f64();
            match self.ban_rule.impose(now) {
                Some(ban) => {
                    warn!(
                        entity = %entity,
                        window_samples = stats.samples,
                        window_reject_ratio = stats.reject_ratio(),
                        duration_secs,
                        "Banning entity"
                    );
                    state.ban = Some(ban);
                }
                None => warn!(
                    entity = %entity,
                    duration_secs,
                    "Ban expiry out of range, not banning"
                ),
            }
        }

        Ok(Decision::rejected(Reason::EntityLimit, allowance.retry_after_secs))
    }

    /// Report `entity`'s counters without changing any limiter state.
    ///
    /// An entity that has never been seen reports zero counts and the level
    /// a fresh bucket starts at.
    pub fn snapshot(&self, entity: &str) -> Result<EntitySnapshot> {
        let entity = validate_entity(entity)?;

        let Some(slot) = self.entities.get(entity) else {
            return Ok(EntitySnapshot::unseen(entity, self.initial_level()));
        };

        let now = self.clock.now();
        let state = slot.lock();
        let total = state.allowed_total + state.rejected_total;
        let window: WindowStats = state.window.peek(now);

        Ok(EntitySnapshot {
            entity: entity.to_string(),
            allowed_count: state.allowed_total,
            rejected_count: state.rejected_total,
            reject_ratio: if total == 0 {
                0.0
            } else {
                state.rejected_total as f64 / total as f64
            },
            window_samples: window.samples,
            window_reject_ratio: window.reject_ratio(),
            bucket_level: state.bucket.level(),
            banned_for_secs: state
                .active_ban(now)
                .map(|ban| ban.remaining(now).as_secs_f64()),
        })
    }

    /// Entities banned at this instant, with seconds remaining.
    pub fn banned_entities(&self) -> Vec<(String, f64)> {
        let now = self.clock.now();
        let mut banned: Vec<(String, f64)> = self
            .entities
            .entity_ids()
            .into_iter()
            .filter_map(|id| {
                let slot = self.entities.get(&id)?;
                let remaining = slot.lock().active_ban(now)?.remaining(now).as_secs_f64();
                Some((id, remaining))
            })
            .collect();
        banned.sort_by(|a, b| a.0.cmp(&b.0));
        banned
    }

    /// Whether `entity` is banned at this instant.
    pub fn is_banned(&self, entity: &str) -> bool {
        let now = self.clock.now();
        let Some(slot) = self.entities.get(entity.trim()) else {
            return false;
        };
        let state = slot.lock();
        state.active_ban(now).is_some()
    }

    /// Level of a freshly created entity bucket.
    fn initial_level(&self) -> f64 {
        match self.config.algorithm {
            Algorithm::Token => self.config.entity.capacity,
            Algorithm::Leaky => 0.0,
        }
    }

    /// Current level of the global bucket.
    pub fn global_level(&self) -> f64 {
        self.global.level()
    }

    /// Number of entities seen so far.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The validated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The instant the engine's clock reports now.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}

/// Trim surrounding whitespace from an entity id, rejecting empty ids.
fn validate_entity(entity: &str) -> Result<&str> {
    let entity = entity.trim();
    if entity.is_empty() {
        return Err(FloodgateError::InvalidInput(
            "entity id must not be empty".to_string(),
        ));
    }
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BucketConfig;
    use std::sync::Barrier;
    use std::time::Duration;

    fn engine(config: EngineConfig) -> (AdmissionController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let controller = AdmissionController::new(config, clock.clone()).unwrap();
        (controller, clock)
    }

    fn config(entity: BucketConfig, global: BucketConfig) -> EngineConfig {
        EngineConfig {
            entity,
            global,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut bad = EngineConfig::default();
        bad.entity.rate = 0.0;
        let result = AdmissionController::new(bad, Arc::new(ManualClock::new()));
        assert!(matches!(result, Err(FloodgateError::Config(_))));
    }

    #[test]
    fn test_huge_ban_duration_is_config_error() {
        for secs in [1e19, 1e300] {
            let mut cfg = EngineConfig::default();
            cfg.ban.duration_secs = secs;
            let result = AdmissionController::new(cfg, Arc::new(ManualClock::new()));
            assert!(matches!(result, Err(FloodgateError::Config(_))));

            let mut cfg = EngineConfig::default();
            cfg.ban.window_secs = secs;
            let result = AdmissionController::new(cfg, Arc::new(ManualClock::new()));
            assert!(matches!(result, Err(FloodgateError::Config(_))));
        }
    }

    #[test]
    fn test_long_ban_is_imposed_without_overflow() {
        let mut cfg = config(BucketConfig::new(1.0, 0.001), BucketConfig::new(100.0, 50.0));
        cfg.ban.duration_secs = crate::config::MAX_DURATION_SECS;
        let (controller, _) = engine(cfg);

        for _ in 0..5 {
            controller.admit("mallory").unwrap();
        }
        assert!(controller.is_banned("mallory"));
        assert_eq!(controller.admit("mallory").unwrap().reason, Reason::Banned);
    }

    #[test]
    fn test_entity_ids_are_trimmed() {
        let (controller, _) = engine(EngineConfig::default());

        for id in ["alice", " alice", "alice\t", "  alice  ", "alice"] {
            assert!(controller.admit(id).unwrap().allowed);
        }
        assert!(!controller.admit(" alice").unwrap().allowed);
        assert_eq!(controller.entity_count(), 1);

        let snapshot = controller.snapshot("alice ").unwrap();
        assert_eq!(snapshot.entity, "alice");
        assert_eq!(snapshot.allowed_count, 5);
        assert_eq!(snapshot.rejected_count, 1);
    }

    #[test]
    fn test_empty_entity_is_input_error() {
        let (controller, _) = engine(EngineConfig::default());

        assert!(matches!(
            controller.admit(""),
            Err(FloodgateError::InvalidInput(_))
        ));
        assert!(matches!(
            controller.admit("   "),
            Err(FloodgateError::InvalidInput(_))
        ));
        assert_eq!(controller.entity_count(), 0);
        assert_eq!(controller.global_level(), 100.0);
    }

    #[test]
    fn test_burst_then_throttle() {
        let (controller, clock) = engine(EngineConfig::default());

        for _ in 0..5 {
            let decision = controller.admit("alice").unwrap();
            assert_eq!(decision, Decision::admitted());
        }

        let decision = controller.admit("alice").unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Reason::EntityLimit);
        assert!((decision.retry_after_secs - 1.0).abs() < 1e-9);

        clock.advance_secs(1.0);
        assert_eq!(controller.admit("alice").unwrap(), Decision::admitted());
    }

    #[test]
    fn test_entities_are_isolated() {
        let (controller, _) = engine(EngineConfig::default());

        for _ in 0..6 {
            controller.admit("noisy").unwrap();
        }
        assert_eq!(controller.admit("quiet").unwrap(), Decision::admitted());
        assert_eq!(controller.entity_count(), 2);
    }

    #[test]
    fn test_global_precedence_leaves_entity_bucket_untouched() {
        let (controller, _) = engine(config(
            BucketConfig::new(5.0, 1.0),
            BucketConfig::new(1.0, 0.5),
        ));

        assert!(controller.admit("alice").unwrap().allowed);

        let decision = controller.admit("bob").unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Reason::GlobalLimit);
        assert!((decision.retry_after_secs - 2.0).abs() < 1e-9);

        let snapshot = controller.snapshot("bob").unwrap();
        assert_eq!(snapshot.bucket_level, 5.0);
        assert_eq!(snapshot.window_samples, 0);
        assert_eq!(snapshot.rejected_count, 1);
    }

    #[test]
    fn test_global_capacity_spent_on_entity_rejection() {
        let (controller, _) = engine(config(
            BucketConfig::new(1.0, 0.001),
            BucketConfig::new(10.0, 0.001),
        ));

        controller.admit("alice").unwrap();
        let decision = controller.admit("alice").unwrap();
        assert_eq!(decision.reason, Reason::EntityLimit);
        assert_eq!(controller.global_level(), 8.0);
    }

    #[test]
    fn test_ban_trigger_at_threshold() {
        let (controller, _) = engine(config(
            BucketConfig::new(2.0, 1.0),
            BucketConfig::new(100.0, 50.0),
        ));

        assert!(controller.admit("mallory").unwrap().allowed);
        assert!(controller.admit("mallory").unwrap().allowed);
        for _ in 0..2 {
            assert_eq!(controller.admit("mallory").unwrap().reason, Reason::EntityLimit);
            assert!(!controller.is_banned("mallory"));
        }

        // Fifth sample: 3 of 5 rejected
        assert_eq!(controller.admit("mallory").unwrap().reason, Reason::EntityLimit);
        assert!(controller.is_banned("mallory"));

        let decision = controller.admit("mallory").unwrap();
        assert_eq!(decision.reason, Reason::Banned);
        assert!((decision.retry_after_secs - 10.0).abs() < 1e-9);
        assert_eq!(controller.banned_entities(), vec![("mallory".to_string(), 10.0)]);
    }

    #[test]
    fn test_no_ban_below_min_samples() {
        let (controller, _) = engine(config(
            BucketConfig::new(1.0, 0.001),
            BucketConfig::new(100.0, 50.0),
        ));

        controller.admit("eve").unwrap();
        for _ in 0..3 {
            controller.admit("eve").unwrap();
        }
        // 4 samples at 0.75 reject ratio
        assert!(!controller.is_banned("eve"));

        controller.admit("eve").unwrap();
        assert!(controller.is_banned("eve"));
    }

    #[test]
    fn test_ban_expiry_is_fixed() {
        let (controller, clock) = engine(config(
            BucketConfig::new(2.0, 1.0),
            BucketConfig::new(100.0, 50.0),
        ));

        for _ in 0..5 {
            controller.admit("mallory").unwrap();
        }
        assert!(controller.is_banned("mallory"));
        let window_before = controller.snapshot("mallory").unwrap().window_samples;

        // Continued traffic during the ban neither extends it nor counts
        clock.advance_secs(5.0);
        let decision = controller.admit("mallory").unwrap();
        assert_eq!(decision.reason, Reason::Banned);
        assert!((decision.retry_after_secs - 5.0).abs() < 1e-9);
        assert_eq!(
            controller.snapshot("mallory").unwrap().window_samples,
            window_before
        );

        clock.advance_secs(5.0);
        assert!(!controller.is_banned("mallory"));
        assert_eq!(controller.admit("mallory").unwrap(), Decision::admitted());
    }

    #[test]
    fn test_banned_request_does_not_touch_global() {
        let (controller, _) = engine(config(
            BucketConfig::new(2.0, 1.0),
            BucketConfig::new(100.0, 0.001),
        ));

        for _ in 0..5 {
            controller.admit("mallory").unwrap();
        }
        let level = controller.global_level();
        controller.admit("mallory").unwrap();
        assert_eq!(controller.global_level(), level);
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let (controller, clock) = engine(EngineConfig::default());

        for _ in 0..7 {
            controller.admit("alice").unwrap();
        }

        let first = controller.snapshot("alice").unwrap();
        assert_eq!(first.allowed_count, 5);
        assert_eq!(first.rejected_count, 2);
        assert!((first.reject_ratio - 2.0 / 7.0).abs() < 1e-12);

        clock.advance_secs(60.0);
        let later = controller.snapshot("alice").unwrap();
        assert_eq!(later.window_samples, 0);
        // Bucket level is reported as of the last accounting
        assert_eq!(later.bucket_level, first.bucket_level);
        assert_eq!(later.allowed_count, 5);
    }

    #[test]
    fn test_snapshot_of_unseen_entity() {
        let (controller, _) = engine(EngineConfig::default());
        let snapshot = controller.snapshot("nobody").unwrap();

        assert_eq!(snapshot.allowed_count, 0);
        assert_eq!(snapshot.reject_ratio, 0.0);
        // A token bucket starts full
        assert_eq!(snapshot.bucket_level, 5.0);
        assert_eq!(controller.entity_count(), 0);

        // First admission leaves one token less than the unseen level
        controller.admit("nobody").unwrap();
        assert_eq!(controller.snapshot("nobody").unwrap().bucket_level, 4.0);
    }

    #[test]
    fn test_snapshot_of_unseen_leaky_entity() {
        let mut cfg = EngineConfig::default();
        cfg.algorithm = Algorithm::Leaky;
        let (controller, _) = engine(cfg);

        let snapshot = controller.snapshot("nobody").unwrap();
        assert_eq!(snapshot.bucket_level, 0.0);
        assert_eq!(controller.entity_count(), 0);
    }

    #[test]
    fn test_leaky_controller() {
        let mut cfg = config(BucketConfig::new(2.0, 1.0), BucketConfig::new(100.0, 50.0));
        cfg.algorithm = Algorithm::Leaky;
        let (controller, clock) = engine(cfg);

        assert!(controller.admit("alice").unwrap().allowed);
        assert!(controller.admit("alice").unwrap().allowed);
        let decision = controller.admit("alice").unwrap();
        assert_eq!(decision.reason, Reason::EntityLimit);
        assert_eq!(decision.retry_after_secs, 1.0);

        clock.advance(Duration::from_millis(999));
        assert!(!controller.admit("alice").unwrap().allowed);
        clock.advance(Duration::from_millis(1));
        assert!(controller.admit("alice").unwrap().allowed);
    }

    #[test]
    fn test_concurrent_first_admissions_share_one_bucket() {
        let (controller, _) = engine(EngineConfig::default());
        let barrier = Barrier::new(16);

        let admitted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        usize::from(controller.admit("racer").unwrap().allowed)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 5);
        assert_eq!(controller.entity_count(), 1);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let script: Vec<(u64, &str)> = vec![
            (0, "a"), (0, "a"), (0, "b"), (100, "a"), (100, "a"), (150, "a"),
            (150, "a"), (150, "a"), (150, "a"), (400, "b"), (900, "a"),
            (1200, "a"), (1250, "c"), (5000, "a"), (12_000, "a"), (12_000, "b"),
        ];

        let run = || {
            let (controller, clock) = engine(config(
                BucketConfig::new(3.0, 2.0),
                BucketConfig::new(8.0, 4.0),
            ));
            script
                .iter()
                .map(|(offset_ms, entity)| {
                    clock.set_offset(Duration::from_millis(*offset_ms));
                    controller.admit(entity).unwrap()
                })
                .collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().any(|d| d.allowed));
        assert!(first.iter().any(|d| !d.allowed));
    }
}
