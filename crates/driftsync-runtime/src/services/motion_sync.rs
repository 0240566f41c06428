//! Motion state sync over RPC.
//!
//! Bridges the wire and the reconciliation engine: a peer pushes entity
//! state with fire-and-forget `motion.update` calls, and this service
//! feeds each push into the receiving side's `MotionRegistry`. Stale
//! pushes are dropped by the registry, not here.

use std::sync::Arc;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use driftsync_core::{DriftError, Result};
use driftsync_motion::{EntityId, MotionRegistry};

use crate::registry::{MethodTable, Service};

pub const SERVICE_NAME: &str = "motion";
pub const METHOD_UPDATE: &str = "update";
pub const METHOD_REMOVE: &str = "remove";

/// One entity state push.
///
/// Vectors serialize as `[x, y, z]` and the orientation as `[x, y, z, w]`,
/// so a full push stays compact on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPush {
    pub entity: EntityId,
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub sequence: u32,
}

/// Build the params list for a `motion.update` call from a push.
pub fn motion_update_params(push: &MotionPush) -> Result<Vec<Value>> {
    Ok(vec![serde_json::to_value(push)?])
}

/// The receiving end of motion sync.
pub struct MotionSyncService {
    registry: Arc<MotionRegistry>,
}

impl MotionSyncService {
    pub fn new(registry: Arc<MotionRegistry>) -> Self {
        Self { registry }
    }
}

impl Service for MotionSyncService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn register(&self, methods: &mut MethodTable) {
        let registry = Arc::clone(&self.registry);
        methods.sync_method(METHOD_UPDATE, move |params, _caller| {
            let push = parse_push(&params)?;
            let accepted = registry.receive_update(
                push.entity,
                push.position,
                push.orientation,
                push.velocity,
                push.sequence,
            );
            if !accepted {
                trace!(
                    entity = push.entity,
                    sequence = push.sequence,
                    "stale motion update dropped"
                );
            }
            Ok(None)
        });

        let registry = Arc::clone(&self.registry);
        methods.sync_method(METHOD_REMOVE, move |params, _caller| {
            let entity = params
                .first()
                .and_then(Value::as_u64)
                .ok_or_else(|| DriftError::Handler("remove expects an entity id".to_owned()))?;
            registry.remove(entity);
            Ok(None)
        });
    }
}

fn parse_push(params: &[Value]) -> Result<MotionPush> {
    let value = params
        .first()
        .cloned()
        .ok_or_else(|| DriftError::Handler("update expects a state object".to_owned()))?;
    serde_json::from_value(value).map_err(|e| DriftError::Handler(format!("bad motion update: {e}")))
}
