// Analysis module - per-block stroke detection kernel
//
// Both detection paths drive the same `StrokeDetector`, so swapping paths only
// changes where the arithmetic runs, never what it computes.
//
// Per block:
// - FrameMetrics: RMS / peak of the block
// - FloorTracker: EMA of block RMS
// - PendingMeasurement: fed before classification so a window that closes in
//   this block frees the slot for an onset in the same block
// - OnsetClassifier: threshold + debounce on the run's audio clock
// - Telemetry: sampled with a seeded RNG, independent of onsets

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DetectorConfig;

pub mod events;
pub mod floor;
pub mod frame;
pub mod measurement;
pub mod onset;

pub use events::{DetectionEvent, RunId, StrokeEvent, StrokeMeasurement, TelemetrySample};
use floor::FloorTracker;
use measurement::PendingMeasurement;
use onset::OnsetClassifier;

/// Counters updated from whichever thread runs the detector.
///
/// Atomics only, so the real-time path can bump them inside the callback.
#[derive(Debug, Default)]
pub struct DetectorCounters {
    blocks: AtomicU64,
    samples: AtomicU64,
    strokes: AtomicU64,
    measurements: AtomicU64,
    dropped_windows: AtomicU64,
}

/// Point-in-time copy of [`DetectorCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DetectorStats {
    pub blocks: u64,
    pub samples: u64,
    pub strokes: u64,
    pub measurements: u64,
    pub dropped_windows: u64,
}

impl DetectorCounters {
    pub fn snapshot(&self) -> DetectorStats {
        DetectorStats {
            blocks: self.blocks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            strokes: self.strokes.load(Ordering::Relaxed),
            measurements: self.measurements.load(Ordering::Relaxed),
            dropped_windows: self.dropped_windows.load(Ordering::Relaxed),
        }
    }
}

/// Stateful stroke detector for a single run.
pub struct StrokeDetector {
    run_id: RunId,
    sample_rate: u32,
    config: DetectorConfig,
    floor: FloorTracker,
    classifier: OnsetClassifier,
    pending: Option<PendingMeasurement>,
    sequence: u64,
    samples_processed: u64,
    rng: StdRng,
    counters: Arc<DetectorCounters>,
}

impl StrokeDetector {
    pub fn new(run_id: RunId, sample_rate: u32, config: DetectorConfig) -> Self {
        Self {
            run_id,
            sample_rate: sample_rate.max(1),
            config: config.clamped(),
            floor: FloorTracker::new(),
            classifier: OnsetClassifier::new(),
            pending: None,
            sequence: 0,
            samples_processed: 0,
            // Seeded from the run so both paths sample telemetry identically.
            rng: StdRng::seed_from_u64(run_id.0),
            counters: Arc::new(DetectorCounters::default()),
        }
    }

    /// Share an externally owned counter set (the engine keeps a handle).
    pub fn with_counters(mut self, counters: Arc<DetectorCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Replace the active configuration. Takes effect on the next block.
    pub fn set_config(&mut self, config: DetectorConfig) {
        self.config = config.clamped();
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn floor(&self) -> &FloorTracker {
        &self.floor
    }

    /// Threshold the next block would face if the floor did not move.
    pub fn threshold_db(&self) -> f32 {
        onset::threshold_db(
            self.floor.floor_db(),
            self.config.sensitivity,
            self.config.min_db,
        )
    }

    /// Audio-clock time of the next block start, in milliseconds.
    pub fn now_ms(&self) -> f64 {
        self.samples_processed as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Advance the audio clock over samples that were captured but never
    /// delivered. Floor, debounce and any pending window are left untouched.
    pub fn skip_samples(&mut self, samples: u64) {
        self.samples_processed += samples;
    }

    pub fn has_pending_measurement(&self) -> bool {
        self.pending.is_some()
    }

    pub fn counters(&self) -> &Arc<DetectorCounters> {
        &self.counters
    }

    /// Process one mono block, reporting events through `emit`.
    ///
    /// Allocation-free; safe to call from an audio callback.
    pub fn process_block<F>(&mut self, block: &[f32], emit: &mut F)
    where
        F: FnMut(DetectionEvent),
    {
        let Some(metrics) = frame::analyze(block) else {
            return;
        };
        let now_ms = self.now_ms();
        let config = self.config;

        self.floor.update(metrics.rms, config.alpha);

        if let Some(pending) = self.pending.as_mut() {
            if pending.feed(block) {
                if let Some(done) = self.pending.take() {
                    self.counters.measurements.fetch_add(1, Ordering::Relaxed);
                    emit(DetectionEvent::Measurement(done.finalize(self.run_id)));
                }
            }
        }

        let decision = self
            .classifier
            .classify(&metrics, &self.floor, &config, now_ms);

        if decision.is_onset {
            self.sequence += 1;
            self.counters.strokes.fetch_add(1, Ordering::Relaxed);
            emit(DetectionEvent::Stroke(StrokeEvent {
                sequence_id: self.sequence,
                run_id: self.run_id,
                occurred_at_ms: now_ms,
                root_mean_square: metrics.rms,
                decibels: decision.block_db,
                peak_decibels: metrics.peak_db(),
                threshold_db: decision.threshold_db,
                floor_db: decision.floor_db,
            }));

            if self.pending.is_some() {
                // First onset wins the window; this stroke gets no refinement.
                self.counters.dropped_windows.fetch_add(1, Ordering::Relaxed);
            } else {
                let mut pending = PendingMeasurement::open(
                    self.sequence,
                    self.sample_rate,
                    config.measure_window_ms,
                );
                if pending.feed(block) {
                    self.counters.measurements.fetch_add(1, Ordering::Relaxed);
                    emit(DetectionEvent::Measurement(pending.finalize(self.run_id)));
                } else {
                    self.pending = Some(pending);
                }
            }
        }

        if self.rng.gen::<f32>() < config.telemetry_probability {
            emit(DetectionEvent::Telemetry(TelemetrySample {
                run_id: self.run_id,
                decibels: decision.block_db,
                floor_db: decision.floor_db,
                threshold_db: decision.threshold_db,
            }));
        }

        self.samples_processed += block.len() as u64;
        self.counters.blocks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .samples
            .fetch_add(block.len() as u64, Ordering::Relaxed);
    }

    /// Convenience wrapper collecting the events of one block.
    pub fn process_collect(&mut self, block: &[f32]) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        self.process_block(block, &mut |event| events.push(event));
        events
    }
}
