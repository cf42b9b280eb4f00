//! Diagnostic event types exposed to the CLI and host applications.

use serde::{Deserialize, Serialize};

use crate::analysis::DetectorStats;
use crate::engine::PathKind;

/// Lifecycle stages reported by the engine, metronome and JNI entry points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    LibraryLoaded,
    ContextInitialized,
    PermissionRequested,
    DetectionRunning,
    DetectionStopped,
    DetectionFailed,
    MetronomeStarted,
    MetronomeStopped,
}

/// Diagnostic error categories surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    PermissionDenied,
    NoInputDevice,
    StreamOpen,
    Teardown,
    FixtureLoad,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    PathSelected {
        run_id: u64,
        path: PathKind,
        sample_rate: u32,
    },
    StrokeDetected {
        run_id: u64,
        sequence_id: u64,
        decibels: f32,
        threshold_db: f32,
    },
    BufferOccupancy {
        channel: String,
        percent: f32,
    },
    QueueOverflow {
        channel: String,
        dropped: u64,
    },
    RunSummary {
        run_id: u64,
        stats: DetectorStats,
    },
    Error {
        code: DiagnosticError,
        error_code: i32,
        context: String,
    },
}
