//! Post-onset measurement window.
//!
//! The triggering block rarely contains the whole transient, so each stroke
//! gets a second, delayed loudness estimate over a fixed number of samples
//! starting at the onset block.

use super::events::{RunId, StrokeMeasurement};
use super::frame::to_db;

/// Window length in samples, at least one.
pub fn window_samples(sample_rate: u32, window_ms: f32) -> usize {
    let samples = (sample_rate as f64 * window_ms.max(0.0) as f64 / 1000.0).round();
    (samples as usize).max(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingMeasurement {
    sequence_id: u64,
    remaining_samples: usize,
    sum_of_squares: f64,
    peak_abs: f32,
    sample_count: usize,
}

impl PendingMeasurement {
    pub fn open(sequence_id: u64, sample_rate: u32, window_ms: f32) -> Self {
        Self {
            sequence_id,
            remaining_samples: window_samples(sample_rate, window_ms),
            sum_of_squares: 0.0,
            peak_abs: 0.0,
            sample_count: 0,
        }
    }

    /// Accumulate up to `remaining_samples` from the front of `block`.
    /// Returns true once the window is full.
    pub fn feed(&mut self, block: &[f32]) -> bool {
        let take = self.remaining_samples.min(block.len());
        for &sample in &block[..take] {
            self.sum_of_squares += (sample as f64) * (sample as f64);
            self.peak_abs = self.peak_abs.max(sample.abs());
        }
        self.sample_count += take;
        self.remaining_samples -= take;
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_samples == 0
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn remaining_samples(&self) -> usize {
        self.remaining_samples
    }

    pub fn finalize(self, run_id: RunId) -> StrokeMeasurement {
        let refined_rms = if self.sample_count == 0 {
            0.0
        } else {
            (self.sum_of_squares / self.sample_count as f64).sqrt() as f32
        };
        StrokeMeasurement {
            sequence_id: self.sequence_id,
            run_id,
            refined_rms,
            refined_db: to_db(refined_rms),
            refined_peak_db: to_db(self.peak_abs),
        }
    }
}
