//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes lifecycle, path selection, stroke and queue
//! health events into a bounded history plus a broadcast stream. Nothing here
//! is called from an audio callback.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::analysis::{DetectorStats, RunId, StrokeEvent};
use crate::engine::PathKind;
use crate::error::{AudioError, ErrorCode};

pub mod events;

pub use events::{DiagnosticError, LifecyclePhase, MetricEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default();
        TelemetrySnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    buffer_gauges: Mutex<HashMap<&'static str, f32>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            buffer_gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn record_phase(&self, phase: LifecyclePhase) {
        self.collector.publish(MetricEvent::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_path(&self, run_id: RunId, path: PathKind, sample_rate: u32) {
        self.collector.publish(MetricEvent::PathSelected {
            run_id: run_id.0,
            path,
            sample_rate,
        });
    }

    pub fn record_stroke(&self, event: &StrokeEvent) {
        self.collector.publish(MetricEvent::StrokeDetected {
            run_id: event.run_id.0,
            sequence_id: event.sequence_id,
            decibels: event.decibels,
            threshold_db: event.threshold_db,
        });
    }

    /// Publish occupancy only when it moved by at least 2.5 points.
    pub fn record_buffer_occupancy(&self, channel: &'static str, percent: f32) {
        let normalized = percent.clamp(0.0, 100.0);
        let Ok(mut gauges) = self.buffer_gauges.lock() else {
            return;
        };

        let should_emit = gauges
            .get(channel)
            .map(|last| (last - normalized).abs() >= 2.5)
            .unwrap_or(true);

        if should_emit {
            gauges.insert(channel, normalized);
            self.collector.publish(MetricEvent::BufferOccupancy {
                channel: channel.to_string(),
                percent: normalized,
            });
        }
    }

    pub fn record_overflow(&self, channel: &str, dropped: u64) {
        if dropped == 0 {
            return;
        }
        self.collector.publish(MetricEvent::QueueOverflow {
            channel: channel.to_string(),
            dropped,
        });
    }

    pub fn record_run_summary(&self, run_id: RunId, stats: DetectorStats) {
        self.collector.publish(MetricEvent::RunSummary {
            run_id: run_id.0,
            stats,
        });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            error_code: 0,
            context: context.into(),
        });
    }

    pub fn record_audio_error(&self, err: &AudioError, context: &str) {
        let code = match err {
            AudioError::PermissionDenied => DiagnosticError::PermissionDenied,
            AudioError::NoInputDevice => DiagnosticError::NoInputDevice,
            AudioError::StreamOpenFailed { .. } | AudioError::UnsupportedFormat { .. } => {
                DiagnosticError::StreamOpen
            }
            AudioError::StreamFailure { .. } => DiagnosticError::Teardown,
            _ => DiagnosticError::Unknown,
        };
        self.collector.publish(MetricEvent::Error {
            code,
            error_code: err.code(),
            context: context.to_string(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(sequence_id: u64) -> StrokeEvent {
        StrokeEvent {
            sequence_id,
            run_id: RunId(77),
            occurred_at_ms: 12.5,
            root_mean_square: 0.2,
            decibels: -14.0,
            peak_decibels: -6.0,
            threshold_db: -40.0,
            floor_db: -52.0,
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MetricEvent::QueueOverflow {
            channel: "events".to_string(),
            dropped: 1,
        });
        collector.publish(MetricEvent::BufferOccupancy {
            channel: "pool".to_string(),
            percent: 50.0,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::QueueOverflow { dropped: 1, .. }
        ));
        assert!(matches!(
            snapshot.recent[1],
            MetricEvent::BufferOccupancy { .. }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for dropped in 1..=3 {
            collector.publish(MetricEvent::QueueOverflow {
                channel: "events".to_string(),
                dropped,
            });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.total_events, 3);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::QueueOverflow { dropped: 2, .. }
        ));
    }

    #[test]
    fn strokes_and_phases_are_recorded() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_phase(LifecyclePhase::DetectionRunning);
        hub.record_stroke(&stroke(4));

        let snapshot = hub.snapshot();
        assert!(snapshot.recent.iter().any(|event| matches!(
            event,
            MetricEvent::Lifecycle {
                phase: LifecyclePhase::DetectionRunning,
                ..
            }
        )));
        assert!(snapshot.recent.iter().any(|event| matches!(
            event,
            MetricEvent::StrokeDetected {
                run_id: 77,
                sequence_id: 4,
                ..
            }
        )));
    }

    #[test]
    fn buffer_gauge_debounces_small_changes() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_buffer_occupancy("pool", 10.0);
        hub.record_buffer_occupancy("pool", 10.5);
        hub.record_buffer_occupancy("pool", 25.0);

        let count = hub
            .snapshot()
            .recent
            .iter()
            .filter(|event| matches!(event, MetricEvent::BufferOccupancy { .. }))
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn zero_overflow_is_not_reported() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_overflow("events", 0);
        assert_eq!(hub.snapshot().total_events, 0);
    }

    #[test]
    fn audio_errors_carry_numeric_code() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_audio_error(&AudioError::PermissionDenied, "start");
        let snapshot = hub.snapshot();
        match &snapshot.recent[0] {
            MetricEvent::Error {
                code, error_code, ..
            } => {
                assert_eq!(*code, DiagnosticError::PermissionDenied);
                assert_eq!(*error_code, AudioError::PermissionDenied.code());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
