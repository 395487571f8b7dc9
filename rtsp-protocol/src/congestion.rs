//! Congestion control for the RTP pacer
//!
//! The server divides each frame's base size by a congestion level. Loss
//! reports from the client move the level along a power-of-two ladder:
//! sustained low loss halves it, high loss doubles it at once. A threshold
//! floor remembers the lowest level that recently saw high loss and stops
//! the controller from halving back below it, which keeps borderline loss
//! rates from flapping between two levels.

use tracing::debug;

/// How many consecutive low-loss reports are needed before halving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakPolicy {
    /// Fixed number of reports
    Fixed(u32),
    /// `max_level + 2 - level` reports: the closer to full quality, the
    /// longer the controller waits
    LevelHeadroom,
}

/// Controller parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionConfig {
    pub min_level: u32,
    pub max_level: u32,
    pub initial_level: u32,
    /// Reports at or below this count toward the low-loss streak
    pub low_loss_threshold: f64,
    /// Reports above this double the level
    pub high_loss_threshold: f64,
    pub streak: StreakPolicy,
    pub use_threshold_floor: bool,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        CongestionConfig {
            min_level: 1,
            max_level: 16,
            initial_level: 16,
            low_loss_threshold: 0.05,
            high_loss_threshold: 0.2,
            streak: StreakPolicy::Fixed(2),
            use_threshold_floor: true,
        }
    }
}

impl CongestionConfig {
    /// Same parameters with a different starting level
    pub fn starting_at(mut self, level: u32) -> Self {
        self.initial_level = level;
        self
    }
}

/// Result of feeding one report to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    Unchanged,
    Lowered { from: u32, to: u32 },
    Raised { from: u32, to: u32 },
}

/// Congestion controller state
#[derive(Debug, Clone)]
pub struct CongestionController {
    config: CongestionConfig,
    level: u32,
    threshold_floor: Option<u32>,
    low_loss_streak: u32,
}

impl CongestionController {
    pub fn new(config: CongestionConfig) -> Self {
        let min_level = config.min_level.max(1);
        let max_level = config.max_level.max(min_level);
        let config = CongestionConfig {
            min_level,
            max_level,
            ..config
        };

        CongestionController {
            level: config.initial_level.clamp(min_level, max_level),
            config,
            threshold_floor: None,
            low_loss_streak: 0,
        }
    }

    /// Current divisor applied to frame sizes (always ≥ 1)
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn threshold_floor(&self) -> Option<u32> {
        self.threshold_floor
    }

    pub fn low_loss_streak(&self) -> u32 {
        self.low_loss_streak
    }

    pub fn config(&self) -> &CongestionConfig {
        &self.config
    }

    /// Scale a base frame size by the current level
    pub fn scale(&self, base_size: u32) -> u32 {
        base_size / self.level
    }

    fn required_streak(&self) -> u32 {
        match self.config.streak {
            StreakPolicy::Fixed(n) => n.max(1),
            StreakPolicy::LevelHeadroom => (self.config.max_level + 2).saturating_sub(self.level),
        }
    }

    fn floor_allows_lowering(&self) -> bool {
        if !self.config.use_threshold_floor {
            return true;
        }
        match self.threshold_floor {
            None => true,
            Some(floor) => self.level > floor,
        }
    }

    /// Feed one fraction-lost report
    ///
    /// Reports outside `[0, 1]` are ignored.
    pub fn on_report(&mut self, fraction_lost: f64) -> LevelChange {
        if !(0.0..=1.0).contains(&fraction_lost) {
            debug!(fraction_lost, "Ignoring out-of-range loss report");
            return LevelChange::Unchanged;
        }

        if fraction_lost <= self.config.low_loss_threshold {
            self.low_loss_streak += 1;

            if self.low_loss_streak >= self.required_streak()
                && self.level > self.config.min_level
                && self.floor_allows_lowering()
            {
                self.low_loss_streak = 0;
                return self.lower();
            }
            LevelChange::Unchanged
        } else if fraction_lost > self.config.high_loss_threshold {
            self.low_loss_streak = 0;
            let change = self.raise();
            if self.threshold_floor.map_or(true, |floor| self.level < floor) {
                self.threshold_floor = Some(self.level);
            }
            change
        } else {
            self.low_loss_streak = 0;
            LevelChange::Unchanged
        }
    }

    /// Explicit reduction request (MODIFY)
    ///
    /// Halves the level regardless of measured loss and forgets the floor.
    pub fn request_reduction(&mut self) -> LevelChange {
        self.threshold_floor = None;
        self.low_loss_streak = 0;
        self.lower()
    }

    fn lower(&mut self) -> LevelChange {
        let from = self.level;
        self.level = (self.level / 2).max(self.config.min_level);
        if self.level == from {
            LevelChange::Unchanged
        } else {
            LevelChange::Lowered { from, to: self.level }
        }
    }

    fn raise(&mut self) -> LevelChange {
        let from = self.level;
        self.level = self.level.saturating_mul(2).min(self.config.max_level);
        if self.level == from {
            LevelChange::Unchanged
        } else {
            LevelChange::Raised { from, to: self.level }
        }
    }

    pub fn stats(&self) -> CongestionStats {
        CongestionStats {
            level: self.level,
            threshold_floor: self.threshold_floor,
            low_loss_streak: self.low_loss_streak,
        }
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new(CongestionConfig::default())
    }
}

/// Congestion control statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionStats {
    pub level: u32,
    pub threshold_floor: Option<u32>,
    pub low_loss_streak: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_at(level: u32) -> CongestionController {
        CongestionController::new(CongestionConfig::default().starting_at(level))
    }

    #[test]
    fn test_defaults() {
        let cc = CongestionController::default();
        assert_eq!(cc.level(), 16);
        assert_eq!(cc.threshold_floor(), None);
        assert_eq!(cc.scale(1000), 62);
    }

    #[test]
    fn test_two_low_reports_halve() {
        let mut cc = controller_at(4);

        assert_eq!(cc.on_report(0.0), LevelChange::Unchanged);
        assert_eq!(cc.low_loss_streak(), 1);
        assert_eq!(cc.on_report(0.0), LevelChange::Lowered { from: 4, to: 2 });
        assert_eq!(cc.level(), 2);
        assert_eq!(cc.low_loss_streak(), 0);
    }

    #[test]
    fn test_high_loss_doubles_immediately() {
        let mut cc = controller_at(4);
        cc.on_report(0.0);

        assert_eq!(cc.on_report(0.3), LevelChange::Raised { from: 4, to: 8 });
        assert_eq!(cc.low_loss_streak(), 0);
        assert_eq!(cc.threshold_floor(), Some(8));
    }

    #[test]
    fn test_mid_band_resets_streak() {
        let mut cc = controller_at(4);
        cc.on_report(0.01);
        assert_eq!(cc.on_report(0.1), LevelChange::Unchanged);
        assert_eq!(cc.low_loss_streak(), 0);
        assert_eq!(cc.on_report(0.01), LevelChange::Unchanged);
        assert_eq!(cc.level(), 4);
    }

    #[test]
    fn test_clamped_at_bounds() {
        let mut cc = controller_at(16);
        assert_eq!(cc.on_report(0.9), LevelChange::Unchanged);
        assert_eq!(cc.level(), 16);

        let mut cc = controller_at(1);
        cc.on_report(0.0);
        assert_eq!(cc.on_report(0.0), LevelChange::Unchanged);
        assert_eq!(cc.level(), 1);
    }

    #[test]
    fn test_threshold_floor_blocks_lowering() {
        let mut cc = controller_at(2);
        cc.on_report(0.5); // 2 -> 4, floor = 4
        assert_eq!(cc.threshold_floor(), Some(4));

        for _ in 0..10 {
            assert_eq!(cc.on_report(0.0), LevelChange::Unchanged);
        }
        assert_eq!(cc.level(), 4);

        cc.on_report(0.5); // 4 -> 8, floor stays 4
        assert_eq!(cc.threshold_floor(), Some(4));
        cc.on_report(0.0);
        assert_eq!(cc.on_report(0.0), LevelChange::Lowered { from: 8, to: 4 });
        cc.on_report(0.0);
        assert_eq!(cc.on_report(0.0), LevelChange::Unchanged);
        assert_eq!(cc.level(), 4);
    }

    #[test]
    fn test_floor_disabled() {
        let config = CongestionConfig {
            use_threshold_floor: false,
            ..CongestionConfig::default().starting_at(2)
        };
        let mut cc = CongestionController::new(config);
        cc.on_report(0.5);
        cc.on_report(0.0);
        assert_eq!(cc.on_report(0.0), LevelChange::Lowered { from: 4, to: 2 });
    }

    #[test]
    fn test_request_reduction_clears_floor() {
        let mut cc = controller_at(2);
        cc.on_report(0.5);
        assert_eq!(cc.request_reduction(), LevelChange::Lowered { from: 4, to: 2 });
        assert_eq!(cc.threshold_floor(), None);

        cc.on_report(0.0);
        assert_eq!(cc.on_report(0.0), LevelChange::Lowered { from: 2, to: 1 });
    }

    #[test]
    fn test_level_headroom_streak() {
        let config = CongestionConfig {
            streak: StreakPolicy::LevelHeadroom,
            ..CongestionConfig::default()
        };
        let mut cc = CongestionController::new(config);

        // At level 16 the headroom rule asks for 2 reports
        cc.on_report(0.0);
        assert_eq!(cc.on_report(0.0), LevelChange::Lowered { from: 16, to: 8 });

        // At level 8 it asks for 10
        for _ in 0..9 {
            assert_eq!(cc.on_report(0.0), LevelChange::Unchanged);
        }
        assert_eq!(cc.on_report(0.0), LevelChange::Lowered { from: 8, to: 4 });
    }

    #[test]
    fn test_invalid_reports_ignored() {
        let mut cc = controller_at(4);
        cc.on_report(0.0);
        assert_eq!(cc.on_report(-0.5), LevelChange::Unchanged);
        assert_eq!(cc.on_report(f64::NAN), LevelChange::Unchanged);
        assert_eq!(cc.on_report(1.5), LevelChange::Unchanged);
        assert_eq!(cc.low_loss_streak(), 1);
    }

    #[test]
    fn test_zero_levels_clamped() {
        let config = CongestionConfig {
            min_level: 0,
            initial_level: 0,
            ..CongestionConfig::default()
        };
        let cc = CongestionController::new(config);
        assert_eq!(cc.level(), 1);
        assert_eq!(cc.scale(1000), 1000);
    }
}
