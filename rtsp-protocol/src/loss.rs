//! Loss accounting for RTCP feedback
//!
//! The client counts playout misses and observed ticks, and once per feedback
//! interval turns the deltas into an exponentially weighted fraction lost:
//!
//! ```text
//! instantaneous = (lost - last_lost) / (observed - last_observed)
//! current       = 0.85 * instantaneous + 0.15 * last_fraction
//! ```

/// Weight of the newest interval in the smoothed fraction
pub const EWMA_WEIGHT: f64 = 0.85;

/// Per-session loss counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossAccounting {
    /// Total playout misses
    pub cumulative_lost: u32,
    /// Total consumption ticks taken while playing
    pub frames_observed: u32,
    pub last_cumulative_lost: u32,
    pub last_frames_observed: u32,
    pub last_fraction_lost: f64,
    pub current_fraction_lost: f64,
}

impl LossAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a consumption tick that found its frame
    pub fn record_hit(&mut self) {
        self.frames_observed = self.frames_observed.wrapping_add(1);
    }

    /// Record a consumption tick that found its frame missing
    pub fn record_miss(&mut self) {
        self.cumulative_lost = self.cumulative_lost.wrapping_add(1);
        self.frames_observed = self.frames_observed.wrapping_add(1);
    }

    /// Loss fraction over the current interval, without smoothing
    pub fn instantaneous(&self) -> f64 {
        let observed = self.frames_observed.wrapping_sub(self.last_frames_observed);
        if observed == 0 {
            return 0.0;
        }
        let lost = self.cumulative_lost.wrapping_sub(self.last_cumulative_lost);
        lost as f64 / observed as f64
    }

    /// Compute the smoothed fraction for this interval and carry it forward
    pub fn update_fraction_lost(&mut self) -> f64 {
        let current =
            EWMA_WEIGHT * self.instantaneous() + (1.0 - EWMA_WEIGHT) * self.last_fraction_lost;
        self.current_fraction_lost = current;
        self.last_fraction_lost = current;
        current
    }

    /// Start a new interval
    pub fn snapshot(&mut self) {
        self.last_cumulative_lost = self.cumulative_lost;
        self.last_frames_observed = self.frames_observed;
    }

    /// Produce the value for one feedback report and start a new interval
    ///
    /// Outside of playback the report is zero and the smoothing history is
    /// left as is.
    pub fn report(&mut self, playing: bool) -> f64 {
        let fraction = if playing {
            self.update_fraction_lost()
        } else {
            0.0
        };
        self.snapshot();
        fraction
    }
}
