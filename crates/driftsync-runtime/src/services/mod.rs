//! Built-in services.

pub mod motion_sync;

pub use motion_sync::{motion_update_params, MotionPush, MotionSyncService};
