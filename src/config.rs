//! Configuration management
//!
//! Detector and metronome parameters plus audio plumbing sizes, loadable from
//! a JSON file so thresholds can be tuned without recompiling. Every section
//! and field has a default, so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::audio::buffer_pool::{DEFAULT_BUFFER_CAPACITY, DEFAULT_BUFFER_COUNT};

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub metronome: MetronomeConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

/// Stroke detection parameters shared by both processing paths
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Multiplier on the floor; the dB threshold sits `sensitivity * 6` dB above it
    pub sensitivity: f32,
    /// Minimum time between two accepted onsets
    pub debounce_ms: f32,
    /// Absolute level below which no onset can fire
    pub min_db: f32,
    /// Floor smoothing coefficient in (0, 1]
    pub alpha: f32,
    /// Post-onset accumulation duration for the refined measurement
    pub measure_window_ms: f32,
    /// Per-block chance of emitting a telemetry sample
    pub telemetry_probability: f32,
}

pub const DEFAULT_SENSITIVITY: f32 = 2.0;
pub const DEFAULT_DEBOUNCE_MS: f32 = 40.0;
pub const DEFAULT_MIN_DB: f32 = -50.0;
pub const DEFAULT_ALPHA: f32 = 0.05;
pub const DEFAULT_MEASURE_WINDOW_MS: f32 = 50.0;
pub const DEFAULT_TELEMETRY_PROBABILITY: f32 = 0.05;

/// Smallest floor smoothing coefficient accepted; zero would freeze the floor.
pub const MIN_ALPHA: f32 = 1e-6;

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            min_db: DEFAULT_MIN_DB,
            alpha: DEFAULT_ALPHA,
            measure_window_ms: DEFAULT_MEASURE_WINDOW_MS,
            telemetry_probability: DEFAULT_TELEMETRY_PROBABILITY,
        }
    }
}

impl DetectorConfig {
    /// Apply range clamps. Non-finite values fall back to the defaults.
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        Self {
            sensitivity: finite_or(self.sensitivity, defaults.sensitivity).max(1.0),
            debounce_ms: finite_or(self.debounce_ms, defaults.debounce_ms).max(0.0),
            min_db: finite_or(self.min_db, defaults.min_db),
            alpha: finite_or(self.alpha, defaults.alpha).clamp(MIN_ALPHA, 1.0),
            measure_window_ms: finite_or(self.measure_window_ms, defaults.measure_window_ms)
                .max(0.0),
            telemetry_probability: finite_or(
                self.telemetry_probability,
                defaults.telemetry_probability,
            )
            .clamp(0.0, 1.0),
        }
    }

    /// Merge a partial update; absent fields keep their current value.
    pub fn merged(self, patch: &DetectorConfigPatch) -> Self {
        Self {
            sensitivity: patch.sensitivity.unwrap_or(self.sensitivity),
            debounce_ms: patch.debounce_ms.unwrap_or(self.debounce_ms),
            min_db: patch.min_db.unwrap_or(self.min_db),
            alpha: patch.alpha.unwrap_or(self.alpha),
            measure_window_ms: patch.measure_window_ms.unwrap_or(self.measure_window_ms),
            telemetry_probability: patch
                .telemetry_probability
                .unwrap_or(self.telemetry_probability),
        }
        .clamped()
    }
}

/// Partial detector update. Missing fields keep the previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfigPatch {
    pub sensitivity: Option<f32>,
    pub debounce_ms: Option<f32>,
    pub min_db: Option<f32>,
    pub alpha: Option<f32>,
    pub measure_window_ms: Option<f32>,
    pub telemetry_probability: Option<f32>,
}

impl DetectorConfigPatch {
    pub fn sensitivity(value: f32) -> Self {
        Self {
            sensitivity: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Metronome parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub tempo_bpm: f64,
    pub subdivision: u32,
    pub volume: f32,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            subdivision: 1,
            volume: 0.8,
        }
    }
}

impl MetronomeConfig {
    /// Clamp subdivision and volume. Tempo is validated separately since a
    /// non-positive tempo has no sensible clamp.
    pub fn clamped(self) -> Self {
        Self {
            tempo_bpm: self.tempo_bpm,
            subdivision: self.subdivision.max(1),
            volume: finite_or(self.volume, 0.0).clamp(0.0, 1.0),
        }
    }
}

/// Which detection path the engine should prefer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPath {
    /// Real-time when the capture backend supports it, otherwise fallback
    #[default]
    Auto,
    Realtime,
    Fallback,
}

/// Audio engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested capture sample rate in Hz
    pub sample_rate: u32,
    /// Number of pooled buffers on the fallback path
    pub buffer_pool_size: usize,
    /// Size of each pooled buffer in samples
    pub buffer_size: usize,
    /// Capacity of the audio thread to dispatcher event ring
    pub event_queue_capacity: usize,
    pub processing_path: ProcessingPath,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_pool_size: DEFAULT_BUFFER_COUNT,
            buffer_size: DEFAULT_BUFFER_CAPACITY,
            event_queue_capacity: 1024,
            processing_path: ProcessingPath::Auto,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults (with a warning) if the file is
    /// missing or not valid JSON.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    tracing::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location.
    ///
    /// Android bundles no readable asset path for native code, so it always
    /// uses defaults there.
    pub fn load() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "android")] {
                tracing::info!("[Config] Using default configuration on Android");
                Self::default()
            } else {
                Self::load_from_file("assets/stroke_config.json")
            }
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
