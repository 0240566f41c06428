//! Per-entity motion state, keyed by entity id.
//!
//! The registry owns the monotonic clock used to stamp snapshot arrival
//! times. The receive path (network) and the tick path (render) may live on
//! different threads; the mutex makes each published update atomic, and
//! neither path blocks on anything but the map lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use glam::{Quat, Vec3};
use tracing::trace;

use crate::snapshot::{MotionConfig, MotionUpdate, RenderState, SnapshotBuffer};

/// Remote entity identifier.
pub type EntityId = u64;

/// Shared map of entity id to snapshot buffer.
pub struct MotionRegistry {
    cfg: MotionConfig,
    epoch: Instant,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    entities: HashMap<EntityId, SnapshotBuffer>,
    last_tick: Option<f64>,
}

impl MotionRegistry {
    pub fn new(cfg: MotionConfig) -> driftsync_core::Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            epoch: Instant::now(),
            inner: Mutex::new(RegistryInner {
                entities: HashMap::new(),
                last_tick: None,
            }),
        })
    }

    /// Seconds since the registry was created (local monotonic clock).
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Ingest one state update for an entity, stamping it with the local
    /// receive time. Returns `false` if it was dropped as stale.
    pub fn receive_update(
        &self,
        entity: EntityId,
        position: Vec3,
        orientation: Quat,
        velocity: Vec3,
        sequence: u32,
    ) -> bool {
        let update = MotionUpdate {
            position,
            orientation,
            velocity,
            sequence,
        };
        let now = self.now();
        let mut inner = self.lock();
        match inner.entities.get_mut(&entity) {
            Some(buffer) => buffer.receive(update, now),
            None => {
                trace!(entity, sequence, "first snapshot for entity");
                inner
                    .entities
                    .insert(entity, SnapshotBuffer::new(self.cfg.clone(), update, now));
                true
            }
        }
    }

    /// Advance every entity's rendered state by one tick.
    pub fn tick(&self) {
        let now = self.now();
        let mut inner = self.lock();
        let dt = match inner.last_tick {
            Some(prev) => (now - prev).max(0.0),
            None => 0.0,
        };
        inner.last_tick = Some(now);
        for buffer in inner.entities.values_mut() {
            buffer.tick(now, dt);
        }
    }

    /// Last rendered state of an entity, if known.
    pub fn rendered(&self, entity: EntityId) -> Option<RenderState> {
        self.lock().entities.get(&entity).map(|b| b.rendered())
    }

    pub fn rendered_position(&self, entity: EntityId) -> Option<Vec3> {
        self.rendered(entity).map(|s| s.position)
    }

    pub fn rendered_orientation(&self, entity: EntityId) -> Option<Quat> {
        self.rendered(entity).map(|s| s.orientation)
    }

    /// Drop an entity's buffer (e.g. when it leaves the area of interest).
    pub fn remove(&self, entity: EntityId) {
        self.lock().entities.remove(&entity);
    }

    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        // A poisoned registry mutex means a panic mid-update on another
        // thread; the map itself is still structurally sound.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
