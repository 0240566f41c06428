//! Animation frame buffering and batched parameter commit.
//!
//! Discrete animation data arrives as timestamped frames and lands in a
//! fixed-capacity ring (oldest-first overwrite). Continuous channels go
//! through `ParameterBatch`, which accumulates every target value set during
//! a tick, runs each scalar channel through its Kalman filter exactly once,
//! and hands the sink a single coherent `CommittedParameters` at end-of-tick.
//! Nothing downstream ever observes a half-written parameter set mid-frame.

use std::collections::{BTreeMap, VecDeque};

use crate::kalman::KalmanChannel;

/// Default capacity of the animation frame ring.
pub const DEFAULT_FRAME_CAPACITY: usize = 32;

/// One discrete animation sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationFrame {
    pub timestamp: f64,
    pub scalars: Vec<f32>,
    pub flags: Vec<bool>,
    /// Discrete state identifiers (e.g. locomotion state machine ids).
    pub states: Vec<u32>,
}

/// Fixed-capacity ring of animation frames, keyed by insertion order.
#[derive(Debug)]
pub struct FrameRing {
    frames: VecDeque<AnimationFrame>,
    capacity: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Insert a frame, evicting the oldest when full.
    pub fn push(&mut self, frame: AnimationFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&AnimationFrame> {
        self.frames.back()
    }

    pub fn oldest(&self) -> Option<&AnimationFrame> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimationFrame> {
        self.frames.iter()
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_CAPACITY)
    }
}

/// The atomic output of one `ParameterBatch::commit`.
///
/// Maps are ordered so the sink sees a deterministic channel order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommittedParameters {
    /// Kalman-smoothed continuous channels.
    pub scalars: BTreeMap<String, f32>,
    pub flags: BTreeMap<String, bool>,
    pub states: BTreeMap<String, u32>,
    /// Triggers fire for exactly the tick they were set in.
    pub triggers: Vec<String>,
}

/// Receives one coherent parameter set per tick.
pub trait ParameterSink {
    fn apply(&mut self, params: &CommittedParameters);
}

/// Per-tick parameter accumulator with per-channel adaptive smoothing.
///
/// Call the setters any number of times within a tick (last write wins per
/// channel), then `commit` once at end-of-tick.
#[derive(Debug)]
pub struct ParameterBatch {
    process_noise: f32,
    measurement_noise: f32,
    channels: BTreeMap<String, KalmanChannel>,
    pending_scalars: BTreeMap<String, f32>,
    pending_flags: BTreeMap<String, bool>,
    pending_states: BTreeMap<String, u32>,
    pending_triggers: Vec<String>,
}

impl ParameterBatch {
    /// `process_noise`/`measurement_noise` seed every scalar channel's
    /// Kalman filter; channels are created lazily on first write.
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            process_noise,
            measurement_noise,
            channels: BTreeMap::new(),
            pending_scalars: BTreeMap::new(),
            pending_flags: BTreeMap::new(),
            pending_states: BTreeMap::new(),
            pending_triggers: Vec::new(),
        }
    }

    /// Target value for a continuous channel this tick.
    pub fn set_scalar(&mut self, name: &str, value: f32) {
        self.pending_scalars.insert(name.to_string(), value);
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.pending_flags.insert(name.to_string(), value);
    }

    pub fn set_state(&mut self, name: &str, value: u32) {
        self.pending_states.insert(name.to_string(), value);
    }

    /// One-tick trigger; deduplicated within the tick.
    pub fn set_trigger(&mut self, name: &str) {
        if !self.pending_triggers.iter().any(|t| t == name) {
            self.pending_triggers.push(name.to_string());
        }
    }

    /// Smoothed estimate of a channel, if it has ever been committed.
    pub fn channel(&self, name: &str) -> Option<&KalmanChannel> {
        self.channels.get(name)
    }

    /// Run each pending scalar through its filter exactly once, then hand
    /// the sink the whole parameter set in one call.
    pub fn commit<S: ParameterSink>(&mut self, dt: f32, sink: &mut S) {
        let mut out = CommittedParameters::default();

        for (name, value) in std::mem::take(&mut self.pending_scalars) {
            let channel = self
                .channels
                .entry(name.clone())
                .or_insert_with(|| KalmanChannel::new(self.process_noise, self.measurement_noise));
            let smoothed = channel.update(value, dt);
            out.scalars.insert(name, smoothed);
        }

        out.flags = std::mem::take(&mut self.pending_flags);
        out.states = std::mem::take(&mut self.pending_states);
        out.triggers = std::mem::take(&mut self.pending_triggers);

        sink.apply(&out);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const DT: f32 = 1.0 / 60.0;

    #[derive(Default)]
    struct RecordingSink {
        applies: Vec<CommittedParameters>,
    }

    impl ParameterSink for RecordingSink {
        fn apply(&mut self, params: &CommittedParameters) {
            self.applies.push(params.clone());
        }
    }

    #[test]
    fn ring_overwrites_oldest_first() {
        let mut ring = FrameRing::new(3);
        for i in 0..5 {
            ring.push(AnimationFrame {
                timestamp: i as f64,
                scalars: vec![i as f32],
                flags: vec![],
                states: vec![],
            });
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest().map(|f| f.timestamp), Some(2.0));
        assert_eq!(ring.latest().map(|f| f.timestamp), Some(4.0));
    }

    #[test]
    fn commit_is_one_apply_per_tick() {
        let mut batch = ParameterBatch::new(0.001, 0.1);
        let mut sink = RecordingSink::default();

        batch.set_scalar("speed", 3.0);
        batch.set_scalar("turn", -1.0);
        batch.set_flag("grounded", true);
        batch.set_state("locomotion", 2);
        batch.set_trigger("jump");
        batch.set_trigger("jump"); // deduplicated

        batch.commit(DT, &mut sink);

        assert_eq!(sink.applies.len(), 1);
        let committed = &sink.applies[0];
        assert_eq!(committed.scalars.len(), 2);
        assert_eq!(committed.flags.get("grounded"), Some(&true));
        assert_eq!(committed.states.get("locomotion"), Some(&2));
        assert_eq!(committed.triggers, vec!["jump".to_string()]);
    }

    #[test]
    fn triggers_do_not_carry_to_the_next_tick() {
        let mut batch = ParameterBatch::new(0.001, 0.1);
        let mut sink = RecordingSink::default();

        batch.set_trigger("attack");
        batch.commit(DT, &mut sink);

        batch.set_scalar("speed", 1.0);
        batch.commit(DT, &mut sink);

        assert!(sink.applies[1].triggers.is_empty());
    }

    #[test]
    fn last_write_wins_within_a_tick() {
        let mut batch = ParameterBatch::new(0.001, 0.001);
        let mut sink = RecordingSink::default();

        batch.set_scalar("speed", 100.0);
        batch.set_scalar("speed", 2.0);
        batch.commit(DT, &mut sink);

        // Exactly one filter update happened, against the last value.
        let smoothed = sink.applies[0].scalars["speed"];
        assert!(smoothed > 0.0 && smoothed <= 2.0);
    }

    #[test]
    fn scalar_channels_converge_across_commits() {
        let mut batch = ParameterBatch::new(0.001, 0.1);
        let mut sink = RecordingSink::default();

        for _ in 0..20 {
            batch.set_scalar("speed", 5.0);
            batch.commit(DT, &mut sink);
        }
        let channel = batch.channel("speed").unwrap();
        assert!((channel.estimate() - 5.0).abs() < 0.05);
        assert!(channel.uncertainty() < 1.0);
    }
}
