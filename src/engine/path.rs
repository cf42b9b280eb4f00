//! Detection path strategy.
//!
//! A path owns wherever the [`StrokeDetector`](crate::analysis::StrokeDetector)
//! runs for one detection run and the plumbing that moves configuration in and
//! events out. The engine picks one in `start` and talks to it only through
//! this trait.

use serde::{Deserialize, Serialize};

use crate::config::{DetectorConfig, ProcessingPath};
use crate::error::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    /// Detection inside the capture callback
    Realtime,
    /// Callback copies samples; a worker thread runs detection
    Fallback,
}

pub trait DetectionPath: Send {
    fn kind(&self) -> PathKind;

    /// Hand a full configuration to the detector. Never blocks; takes effect
    /// on the next block the detector processes.
    fn configure(&mut self, config: DetectorConfig);

    /// Drain outstanding events and join helper threads. Call after the
    /// capture stream has been closed. Idempotent.
    fn shutdown(&mut self) -> Result<(), AudioError>;
}

/// Resolve the configured preference against backend capability.
pub fn select_path(preference: ProcessingPath, isolated_available: bool) -> PathKind {
    match (preference, isolated_available) {
        (ProcessingPath::Fallback, _) => PathKind::Fallback,
        (_, true) => PathKind::Realtime,
        (ProcessingPath::Realtime, false) => {
            tracing::info!(
                "[DetectionEngine] Real-time processing requested but unavailable; using fallback"
            );
            PathKind::Fallback
        }
        (ProcessingPath::Auto, false) => {
            tracing::info!("[DetectionEngine] Isolated processing unavailable; using fallback");
            PathKind::Fallback
        }
    }
}
