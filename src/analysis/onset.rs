//! Onset classification
//!
//! A block is an onset when it clears the adaptive threshold in both the dB
//! and linear domains and the debounce window since the last accepted onset
//! has elapsed. The linear check keeps faint blocks near silence from passing
//! on the strength of the epsilon offset in the dB conversion.
//!
//! Time is the run's audio clock in milliseconds, never wall time.

use super::floor::FloorTracker;
use super::frame::FrameMetrics;
use crate::config::DetectorConfig;

/// Decibels of threshold offset per unit of sensitivity.
pub const DB_PER_SENSITIVITY: f32 = 6.0;

/// Threshold for a given floor: `max(floor_db + sensitivity * 6, min_db)`.
#[inline]
pub fn threshold_db(floor_db: f32, sensitivity: f32, min_db: f32) -> f32 {
    (floor_db + sensitivity * DB_PER_SENSITIVITY).max(min_db)
}

/// Outcome of classifying a single block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetDecision {
    pub is_onset: bool,
    pub threshold_db: f32,
    pub floor_db: f32,
    pub block_db: f32,
}

#[derive(Debug, Clone, Default)]
pub struct OnsetClassifier {
    last_onset_ms: Option<f64>,
}

impl OnsetClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one block. Call after the floor has absorbed this block.
    ///
    /// Records `now_ms` as the last onset time when the block is accepted.
    pub fn classify(
        &mut self,
        metrics: &FrameMetrics,
        floor: &FloorTracker,
        config: &DetectorConfig,
        now_ms: f64,
    ) -> OnsetDecision {
        let floor_db = floor.floor_db();
        let threshold = threshold_db(floor_db, config.sensitivity, config.min_db);
        let block_db = metrics.rms_db();

        let loud_enough = block_db > threshold;
        let above_floor = metrics.rms > floor.linear_rms() * config.sensitivity;
        let debounced = match self.last_onset_ms {
            Some(last) => now_ms - last > config.debounce_ms as f64,
            None => true,
        };

        let is_onset = loud_enough && above_floor && debounced;
        if is_onset {
            self.last_onset_ms = Some(now_ms);
        }

        OnsetDecision {
            is_onset,
            threshold_db: threshold,
            floor_db,
            block_db,
        }
    }

    pub fn last_onset_ms(&self) -> Option<f64> {
        self.last_onset_ms
    }
}
