//! Lazily populated per-entity limiter state.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::ban::BanEntry;
use super::bucket::BucketAlgorithm;
use super::window::SlidingWindow;
use crate::config::EngineConfig;
use crate::error::Result;

/// Everything the engine knows about one entity.
///
/// The bucket, the window and the ban form one unit of mutable state and are
/// only touched while the slot's lock is held.
#[derive(Debug)]
pub struct EntityState {
    /// Per-entity bucket
    pub bucket: BucketAlgorithm,
    /// Recent outcomes used by the ban rule
    pub window: SlidingWindow,
    /// Most recent ban, possibly expired
    pub ban: Option<BanEntry>,
    /// Lifetime count of admitted requests
    pub allowed_total: u64,
    /// Lifetime count of rejected requests, for any reason
    pub rejected_total: u64,
}

impl EntityState {
    fn new(config: &EngineConfig, window: Duration, now: Instant) -> Self {
        Self {
            bucket: BucketAlgorithm::new(config.algorithm, config.entity, now),
            window: SlidingWindow::new(window),
            ban: None,
            allowed_total: 0,
            rejected_total: 0,
        }
    }

    /// The ban in force at `now`, if any.
    pub fn active_ban(&self, now: Instant) -> Option<&BanEntry> {
        self.ban.as_ref().filter(|b| b.is_active(now))
    }
}

/// Shared handle to one entity's state.
pub type EntitySlot = Arc<Mutex<EntityState>>;

/// Owns one [`EntityState`] per entity id, created on first use.
pub struct EntityRegistry {
    config: EngineConfig,
    window: Duration,
    slots: DashMap<String, EntitySlot>,
}

impl EntityRegistry {
    /// Create an empty registry that builds slots from `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let window = config.ban.window()?;
        Ok(Self {
            config,
            window,
            slots: DashMap::new(),
        })
    }

    /// Return the slot for `entity`, creating it if this is the first sighting.
    ///
    /// Racing first calls for the same id all receive the same slot.
    pub fn get_or_create(&self, entity: &str, now: Instant) -> EntitySlot {
        if let Some(slot) = self.slots.get(entity) {
            return Arc::clone(slot.value());
        }

        let slot = self.slots.entry(entity.to_string()).or_insert_with(|| {
            debug!(
                entity = %entity,
                algorithm = %self.config.algorithm,
                capacity = self.config.entity.capacity,
                rate = self.config.entity.rate,
                "Creating new entity limiter"
            );
            Arc::new(Mutex::new(EntityState::new(&self.config, self.window, now)))
        });
        Arc::clone(slot.value())
    }

    /// Return the slot for `entity` without creating one.
    pub fn get(&self, entity: &str) -> Option<EntitySlot> {
        self.slots.get(entity).map(|slot| Arc::clone(slot.value()))
    }

    /// Ids of every entity seen so far.
    pub fn entity_ids(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    /// Number of entities seen so far.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no entity has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
