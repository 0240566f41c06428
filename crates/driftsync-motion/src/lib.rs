//! driftsync motion: client-side state reconciliation.
//!
//! Makes remote entities move smoothly despite network jitter and loss:
//! - `snapshot`: interpolation/extrapolation over locally-stamped snapshots,
//!   with snap-teleport and a final exponential smoothing pass.
//! - `seq`: wraparound-safe ordering of u32 sequence numbers.
//! - `kalman`: independent 1-D filters for continuous animation channels.
//! - `animator`: frame ring buffer and the batched per-tick parameter commit.
//! - `registry`: per-entity buffers behind one ingestion/query surface.
//!
//! Everything here is transport-agnostic: the RPC runtime pushes updates in
//! and the render loop reads smoothed state out, and neither side blocks on
//! I/O inside a tick.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod animator;
pub mod kalman;
pub mod registry;
pub mod seq;
pub mod snapshot;

pub use animator::{
    AnimationFrame, CommittedParameters, FrameRing, ParameterBatch, ParameterSink,
    DEFAULT_FRAME_CAPACITY,
};
pub use kalman::KalmanChannel;
pub use registry::{EntityId, MotionRegistry};
pub use seq::{sequence_is_newer, sequence_is_older};
pub use snapshot::{MotionConfig, MotionUpdate, RenderState, Snapshot, SnapshotBuffer};
