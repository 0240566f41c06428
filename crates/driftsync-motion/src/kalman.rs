//! Per-channel 1-D Kalman filtering.
//!
//! Each continuous animation channel (movement speed, blend direction, ...)
//! owns one independent filter. The filter balances process noise `q` (how
//! much the true value is allowed to drift between measurements) against
//! measurement noise `r` (how jittery the inputs are), producing a smoothed
//! estimate plus a rate usable for dead-reckoning elsewhere.

/// Independent 1-D Kalman filter over one scalar channel.
#[derive(Debug, Clone)]
pub struct KalmanChannel {
    estimate: f32,
    rate: f32,
    covariance: f32,
    q: f32,
    r: f32,
}

impl KalmanChannel {
    /// Filter starting at zero with unit uncertainty.
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            estimate: 0.0,
            rate: 0.0,
            covariance: 1.0,
            q: process_noise,
            r: measurement_noise,
        }
    }

    /// Predict forward by `dt`, then correct against `measurement`.
    ///
    /// Returns the corrected estimate. Non-positive `dt` skips the rate
    /// update (there is no time base to divide by) but still corrects.
    pub fn update(&mut self, measurement: f32, dt: f32) -> f32 {
        // Predict
        let predicted = self.estimate + self.rate * dt;
        self.covariance += self.q;

        // Correct
        let gain = self.covariance / (self.covariance + self.r);
        let innovation = measurement - predicted;
        self.estimate = predicted + gain * innovation;
        self.covariance *= 1.0 - gain;
        if dt > 0.0 {
            self.rate = innovation / dt;
        }
        self.estimate
    }

    /// Current smoothed estimate.
    pub fn estimate(&self) -> f32 {
        self.estimate
    }

    /// Estimated rate of change, for second-order prediction.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Current error covariance.
    pub fn uncertainty(&self) -> f32 {
        self.covariance
    }
}
