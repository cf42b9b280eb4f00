//! Adaptive noise floor.
//!
//! An exponential moving average of block RMS. Higher `alpha` tracks room
//! changes faster but lets sustained loud playing drag the floor upward.

use super::frame::to_db;
use crate::config::MIN_ALPHA;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FloorTracker {
    linear_rms: f32,
}

impl FloorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one block's RMS into the floor.
    #[inline]
    pub fn update(&mut self, block_rms: f32, alpha: f32) {
        let alpha = alpha.clamp(MIN_ALPHA, 1.0);
        self.linear_rms = alpha * block_rms + (1.0 - alpha) * self.linear_rms;
    }

    pub fn linear_rms(&self) -> f32 {
        self.linear_rms
    }

    pub fn floor_db(&self) -> f32 {
        to_db(self.linear_rms)
    }

    pub fn reset(&mut self) {
        self.linear_rms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let tracker = FloorTracker::new();
        assert_eq!(tracker.linear_rms(), 0.0);
        assert!(tracker.floor_db().is_finite());
    }

    #[test]
    fn single_update_applies_alpha() {
        let mut tracker = FloorTracker::new();
        tracker.update(1.0, 0.25);
        assert!((tracker.linear_rms() - 0.25).abs() < 1e-6);
        tracker.update(1.0, 0.25);
        assert!((tracker.linear_rms() - 0.4375).abs() < 1e-6);
    }

    #[test]
    fn zero_alpha_uses_the_configured_minimum() {
        let mut raw = FloorTracker::new();
        raw.update(1.0, 0.0);
        let mut clamped = FloorTracker::new();
        clamped.update(1.0, MIN_ALPHA);
        assert_eq!(raw, clamped);
        assert!((raw.linear_rms() - MIN_ALPHA).abs() < 1e-12);
    }

    #[test]
    fn alpha_one_tracks_instantly() {
        let mut tracker = FloorTracker::new();
        tracker.update(0.3, 1.0);
        assert_eq!(tracker.linear_rms(), 0.3);
    }

    #[test]
    fn converges_for_any_alpha() {
        let level = 0.01_f32;
        for &alpha in &[0.01_f32, 0.05, 0.2, 0.5, 1.0] {
            let mut tracker = FloorTracker::new();
            for _ in 0..5_000 {
                tracker.update(level, alpha);
            }
            assert!(
                (tracker.floor_db() - to_db(level)).abs() < 1e-3,
                "alpha {} settled at {} dB",
                alpha,
                tracker.floor_db()
            );
        }
    }

    #[test]
    fn reset_clears_state() {
        let mut tracker = FloorTracker::new();
        tracker.update(0.7, 0.5);
        tracker.reset();
        assert_eq!(tracker.linear_rms(), 0.0);
    }
}
