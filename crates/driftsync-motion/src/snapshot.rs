//! Snapshot buffering, interpolation, and dead reckoning.
//!
//! One `SnapshotBuffer` per remote entity. The network-receive path pushes
//! updates (stamped with the *local* receive time, never the sender's clock),
//! and the per-tick render path samples a smoothed state slightly in the
//! past (`interpolation_delay`) so there is almost always a pair of
//! snapshots to blend between. When the render time runs past the newest
//! snapshot the buffer dead-reckons from the last known velocity, capped at
//! `extrapolation_limit` seconds of travel.

use glam::{Quat, Vec3};
use tracing::debug;

use crate::seq::sequence_is_older;

/// Tuning knobs for the reconciliation engine.
///
/// Everything is set at construction time; there are no protocol-level
/// defaults hiding behind these.
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// How far in the past the render time sits, in seconds.
    pub interpolation_delay: f64,
    /// Floor for the delay; rendering closer to "now" than this invites
    /// constant extrapolation.
    pub min_interpolation_delay: f64,
    /// Positional jumps beyond this distance are treated as teleports.
    pub snap_distance: f32,
    /// Maximum seconds of dead reckoning past the newest snapshot.
    pub extrapolation_limit: f64,
    /// Exponential smoothing speed for the final render pass.
    pub smooth_speed: f32,
    /// Below this angle (degrees) orientation blending uses nlerp, above it
    /// slerp.
    pub small_angle_deg: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            interpolation_delay: 0.050,
            min_interpolation_delay: 0.020,
            snap_distance: 5.0,
            extrapolation_limit: 0.5,
            smooth_speed: 10.0,
            small_angle_deg: 10.0,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> driftsync_core::Result<()> {
        use driftsync_core::DriftError;
        if self.interpolation_delay <= 0.0 || self.min_interpolation_delay <= 0.0 {
            return Err(DriftError::Config(
                "interpolation delays must be positive".into(),
            ));
        }
        if self.snap_distance <= 0.0 {
            return Err(DriftError::Config("snap_distance must be positive".into()));
        }
        if self.extrapolation_limit < 0.0 {
            return Err(DriftError::Config(
                "extrapolation_limit must not be negative".into(),
            ));
        }
        if self.smooth_speed <= 0.0 {
            return Err(DriftError::Config("smooth_speed must be positive".into()));
        }
        Ok(())
    }

    fn effective_delay(&self) -> f64 {
        self.interpolation_delay.max(self.min_interpolation_delay)
    }
}

/// One state sample as sent by the authority, without any local stamping.
#[derive(Debug, Clone, Copy)]
pub struct MotionUpdate {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub sequence: u32,
}

/// A locally-stamped sample. `recv_time` comes from the receiver's monotonic
/// clock, which isolates the interpolation math from sender clock skew.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub recv_time: f64,
    pub sequence: u32,
}

impl Snapshot {
    fn from_update(u: MotionUpdate, recv_time: f64) -> Self {
        Self {
            position: u.position,
            orientation: u.orientation,
            velocity: u.velocity,
            recv_time,
            sequence: u.sequence,
        }
    }

    fn render_state(&self) -> RenderState {
        RenderState {
            position: self.position,
            orientation: self.orientation,
            velocity: self.velocity,
        }
    }
}

/// The continuously-queried output of the buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
}

/// Interpolation buffer over the last two accepted snapshots.
///
/// `from.recv_time <= to.recv_time` holds at all times; `current` is the
/// last rendered result and the seed of the exponential smoothing pass.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    cfg: MotionConfig,
    from: Snapshot,
    to: Snapshot,
    current: RenderState,
    last_sequence: u32,
}

impl SnapshotBuffer {
    /// Buffer seeded from the first accepted update.
    pub fn new(cfg: MotionConfig, first: MotionUpdate, now: f64) -> Self {
        let snap = Snapshot::from_update(first, now);
        Self {
            cfg,
            from: snap,
            to: snap,
            current: snap.render_state(),
            last_sequence: first.sequence,
        }
    }

    /// Accept or reject an inbound update. Returns `false` if the update's
    /// sequence is older than the last accepted one.
    pub fn receive(&mut self, update: MotionUpdate, now: f64) -> bool {
        if sequence_is_older(update.sequence, self.last_sequence) {
            debug!(
                seq = update.sequence,
                last = self.last_sequence,
                "dropping stale snapshot"
            );
            return false;
        }
        self.last_sequence = update.sequence;

        let snap = Snapshot::from_update(update, now);
        let jump_sq = (snap.position - self.to.position).length_squared();
        if jump_sq > self.cfg.snap_distance * self.cfg.snap_distance {
            // Teleport: no interpolation across the jump.
            self.from = snap;
            self.to = snap;
            self.current = snap.render_state();
        } else {
            self.from = self.to;
            self.to = snap;
        }
        true
    }

    /// Advance the rendered state. `now` is the local monotonic time of this
    /// tick, `dt` the seconds since the previous tick.
    pub fn tick(&mut self, now: f64, dt: f64) -> RenderState {
        let target = self.sample(now - self.cfg.effective_delay());

        // Exponential smoothing toward the target hides jitter in the
        // render time itself.
        let t = (self.cfg.smooth_speed * dt as f32).clamp(0.0, 1.0);
        self.current = RenderState {
            position: self.current.position.lerp(target.position, t),
            orientation: self.current.orientation.slerp(target.orientation, t),
            velocity: self.current.velocity.lerp(target.velocity, t),
        };
        self.current
    }

    /// Last rendered state, without advancing.
    pub fn rendered(&self) -> RenderState {
        self.current
    }

    /// Most recently accepted sequence number.
    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    /// Raw reconstruction at `render_time`: interpolate inside the
    /// `[from, to]` window, dead-reckon past it, hold `from` before it.
    fn sample(&self, render_time: f64) -> RenderState {
        if render_time < self.from.recv_time {
            // Stale render time: nothing older to blend with.
            return self.from.render_state();
        }

        if render_time <= self.to.recv_time {
            let span = self.to.recv_time - self.from.recv_time;
            let t = if span > f64::EPSILON {
                (((render_time - self.from.recv_time) / span) as f32).clamp(0.0, 1.0)
            } else {
                1.0
            };
            return RenderState {
                position: self.from.position.lerp(self.to.position, t),
                orientation: self.blend_orientation(t),
                velocity: self.from.velocity.lerp(self.to.velocity, t),
            };
        }

        // Dead reckoning, capped: beyond the limit the position stops
        // advancing instead of sailing off on stale velocity.
        let elapsed = (render_time - self.to.recv_time).min(self.cfg.extrapolation_limit);
        RenderState {
            position: self.to.position + self.to.velocity * elapsed as f32,
            orientation: self.to.orientation,
            velocity: self.to.velocity,
        }
    }

    fn blend_orientation(&self, t: f32) -> Quat {
        let angle = self.from.orientation.angle_between(self.to.orientation);
        if angle < self.cfg.small_angle_deg.to_radians() {
            self.from.orientation.lerp(self.to.orientation, t)
        } else {
            self.from.orientation.slerp(self.to.orientation, t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(pos: Vec3, vel: Vec3, seq: u32) -> MotionUpdate {
        MotionUpdate {
            position: pos,
            orientation: Quat::IDENTITY,
            velocity: vel,
            sequence: seq,
        }
    }

    // High smooth_speed makes tick() land exactly on the sampled target,
    // which keeps the assertions exact.
    fn snappy_cfg() -> MotionConfig {
        MotionConfig {
            smooth_speed: 1000.0,
            ..MotionConfig::default()
        }
    }

    #[test]
    fn midpoint_interpolation() {
        let cfg = MotionConfig {
            interpolation_delay: 0.0,
            min_interpolation_delay: f64::EPSILON,
            ..snappy_cfg()
        };
        let mut buf = SnapshotBuffer::new(cfg, update(Vec3::ZERO, Vec3::ZERO, 1), 0.0);
        assert!(buf.receive(update(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, 2), 0.1));

        let state = buf.tick(0.05, 1.0);
        assert!((state.position - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn stale_sequence_rejected() {
        let mut buf =
            SnapshotBuffer::new(MotionConfig::default(), update(Vec3::ZERO, Vec3::ZERO, 10), 0.0);
        assert!(!buf.receive(update(Vec3::ONE, Vec3::ZERO, 5), 0.1));
        assert_eq!(buf.last_sequence(), 10);

        // Equal sequence is not "older": accepted.
        assert!(buf.receive(update(Vec3::ONE, Vec3::ZERO, 10), 0.2));
    }

    #[test]
    fn wraparound_sequence_accepted() {
        let mut buf = SnapshotBuffer::new(
            MotionConfig::default(),
            update(Vec3::ZERO, Vec3::ZERO, u32::MAX),
            0.0,
        );
        assert!(buf.receive(update(Vec3::ONE, Vec3::ZERO, 0), 0.1));
    }

    #[test]
    fn snap_threshold_teleports() {
        let mut buf =
            SnapshotBuffer::new(snappy_cfg(), update(Vec3::ZERO, Vec3::ZERO, 1), 0.0);
        // 10 units > snap_distance 5: teleport, no in-between frames.
        assert!(buf.receive(update(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, 2), 0.1));

        let state = buf.rendered();
        assert_eq!(state.position, Vec3::new(10.0, 0.0, 0.0));
        // And any tick stays pinned there, not somewhere between.
        let state = buf.tick(0.1, 0.016);
        assert_eq!(state.position, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn extrapolation_is_capped() {
        let cfg = MotionConfig {
            interpolation_delay: f64::EPSILON,
            min_interpolation_delay: f64::EPSILON,
            extrapolation_limit: 0.5,
            ..snappy_cfg()
        };
        let vel = Vec3::new(2.0, 0.0, 0.0);
        let mut buf = SnapshotBuffer::new(cfg, update(Vec3::ZERO, vel, 1), 0.0);

        // 2 seconds past the last snapshot, limit 0.5s at 2 m/s: one meter.
        let state = buf.tick(2.0, 1.0);
        assert!((state.position - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(state.velocity, vel);
    }

    #[test]
    fn stale_render_time_holds_from() {
        let cfg = MotionConfig {
            interpolation_delay: 10.0,
            min_interpolation_delay: 0.02,
            ..snappy_cfg()
        };
        let mut buf = SnapshotBuffer::new(cfg, update(Vec3::ONE, Vec3::ZERO, 1), 5.0);
        buf.receive(update(Vec3::new(2.0, 1.0, 1.0), Vec3::ZERO, 2), 5.1);

        // render_time = 6 - 10 < from.recv_time: fall back to `from`.
        let state = buf.tick(6.0, 1.0);
        assert_eq!(state.position, Vec3::ONE);
    }

    #[test]
    fn smoothing_moves_partway() {
        let cfg = MotionConfig {
            interpolation_delay: f64::EPSILON,
            min_interpolation_delay: f64::EPSILON,
            smooth_speed: 5.0,
            ..MotionConfig::default()
        };
        let mut buf = SnapshotBuffer::new(cfg, update(Vec3::ZERO, Vec3::ZERO, 1), 0.0);
        buf.receive(update(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, 2), 0.0);

        // t = 5.0 * 0.1 = 0.5: halfway toward the target this tick.
        let state = buf.tick(0.5, 0.1);
        assert!((state.position.x - 0.5).abs() < 1e-5);
        // A second tick closes half the remaining gap.
        let state = buf.tick(0.6, 0.1);
        assert!((state.position.x - 0.75).abs() < 1e-5);
    }
}
