//! Detection output events.
//!
//! All payloads are plain `Copy` values so they can leave the audio thread
//! through a lock-free ring without allocating.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier for one start-to-stop detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl RunId {
    /// Mint a process-unique run id.
    pub fn next() -> Self {
        RunId(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// One accepted onset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeEvent {
    pub sequence_id: u64,
    pub run_id: RunId,
    /// Audio-clock time of the triggering block, relative to run start
    pub occurred_at_ms: f64,
    pub root_mean_square: f32,
    pub decibels: f32,
    pub peak_decibels: f32,
    pub threshold_db: f32,
    pub floor_db: f32,
}

/// Refined loudness for a stroke, emitted when its window closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeMeasurement {
    pub sequence_id: u64,
    pub run_id: RunId,
    pub refined_rms: f32,
    pub refined_db: f32,
    pub refined_peak_db: f32,
}

/// Randomly sampled level snapshot for meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub run_id: RunId,
    pub decibels: f32,
    pub floor_db: f32,
    pub threshold_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DetectionEvent {
    Stroke(StrokeEvent),
    Measurement(StrokeMeasurement),
    Telemetry(TelemetrySample),
}

impl DetectionEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            DetectionEvent::Stroke(event) => event.run_id,
            DetectionEvent::Measurement(measurement) => measurement.run_id,
            DetectionEvent::Telemetry(sample) => sample.run_id,
        }
    }

    pub fn as_stroke(&self) -> Option<&StrokeEvent> {
        match self {
            DetectionEvent::Stroke(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_measurement(&self) -> Option<&StrokeMeasurement> {
        match self {
            DetectionEvent::Measurement(measurement) => Some(measurement),
            _ => None,
        }
    }
}
