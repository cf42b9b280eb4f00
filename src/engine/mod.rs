//! Detection engine: run lifecycle, path selection and the event stream.
//!
//! ```text
//! Idle ──start──▶ Permission ──granted──▶ Running ──stop──▶ Idle
//!                     │
//!                     └──denied / no device / open failure──▶ Error ──start──▶ Permission
//! ```
//!
//! `stop` is valid from every state and always lands in `Idle`.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::analysis::{DetectionEvent, DetectorCounters, DetectorStats, RunId, StrokeDetector};
use crate::audio::backend::{CaptureBackend, CaptureRequest, CaptureStream};
use crate::config::{AppConfig, AudioConfig, DetectorConfig, DetectorConfigPatch};
use crate::error::{log_audio_error, AudioError};
use crate::telemetry::{self, LifecyclePhase};

mod config_slot;
pub mod fallback;
pub mod path;
pub mod realtime;

pub use fallback::FallbackPath;
pub use path::{select_path, DetectionPath, PathKind};
pub use realtime::RealtimePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Permission,
    Running,
    Error,
}

struct ActiveRun {
    run_id: RunId,
    sample_rate: u32,
    path: Box<dyn DetectionPath>,
    stream: Box<dyn CaptureStream>,
    counters: Arc<DetectorCounters>,
}

pub struct DetectionEngine {
    backend: Arc<dyn CaptureBackend>,
    audio: AudioConfig,
    config: DetectorConfig,
    status: EngineStatus,
    last_error: Option<AudioError>,
    events: broadcast::Sender<DetectionEvent>,
    active: Option<ActiveRun>,
    last_summary: Option<(RunId, DetectorStats)>,
}

impl DetectionEngine {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: &AppConfig) -> Self {
        let (events, _) = broadcast::channel(config.audio.event_queue_capacity.max(1));
        Self {
            backend,
            audio: config.audio.clone(),
            config: config.detector.clamped(),
            status: EngineStatus::Idle,
            last_error: None,
            events,
            active: None,
            last_summary: None,
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start a detection run. A no-op returning the current run id when
    /// already running.
    pub fn start(&mut self, patch: Option<DetectorConfigPatch>) -> Result<RunId, AudioError> {
        if let Some(active) = &self.active {
            tracing::debug!("[DetectionEngine] start ignored, {} running", active.run_id);
            return Ok(active.run_id);
        }

        if let Some(patch) = patch {
            self.config = self.config.merged(&patch);
        }

        self.status = EngineStatus::Permission;
        telemetry::hub().record_phase(LifecyclePhase::PermissionRequested);

        let request = CaptureRequest::from_config(&self.audio);
        let format = match self.backend.negotiate(&request) {
            Ok(format) => format,
            Err(err) => return Err(self.fail(err, "negotiate")),
        };

        let kind = select_path(self.audio.processing_path, format.isolated_processing);
        let run_id = RunId::next();
        let counters = Arc::new(DetectorCounters::default());
        let detector = StrokeDetector::new(run_id, format.sample_rate, self.config)
            .with_counters(Arc::clone(&counters));

        let spawned = match kind {
            PathKind::Realtime => RealtimePath::spawn(detector, self.events.clone(), &self.audio)
                .map(|(path, sink)| (Box::new(path) as Box<dyn DetectionPath>, sink)),
            PathKind::Fallback => FallbackPath::spawn(detector, self.events.clone(), &self.audio)
                .map(|(path, sink)| (Box::new(path) as Box<dyn DetectionPath>, sink)),
        };
        let (mut path, sink) = match spawned {
            Ok(pair) => pair,
            Err(err) => return Err(self.fail(err, "spawn path")),
        };

        let stream = match self.backend.open(&format, sink) {
            Ok(stream) => stream,
            Err(err) => {
                if let Err(shutdown_err) = path.shutdown() {
                    log_audio_error(&shutdown_err, "DetectionEngine::start cleanup");
                }
                return Err(self.fail(err, "open stream"));
            }
        };

        tracing::info!(
            "[DetectionEngine] {} running on {:?} path via {} at {} Hz",
            run_id,
            kind,
            self.backend.name(),
            format.sample_rate
        );
        telemetry::hub().record_path(run_id, kind, format.sample_rate);
        telemetry::hub().record_phase(LifecyclePhase::DetectionRunning);

        self.active = Some(ActiveRun {
            run_id,
            sample_rate: format.sample_rate,
            path,
            stream,
            counters,
        });
        self.last_error = None;
        self.status = EngineStatus::Running;
        Ok(run_id)
    }

    /// Stop the current run and release the device. Safe from any state.
    pub fn stop(&mut self) {
        if let Some(mut run) = self.active.take() {
            // Closing the stream drops the sink, which lets the path drain.
            if let Err(err) = run.stream.close() {
                log_audio_error(&err, "DetectionEngine::stop stream");
                telemetry::hub().record_audio_error(&err, "stop stream");
            }
            if let Err(err) = run.path.shutdown() {
                log_audio_error(&err, "DetectionEngine::stop path");
                telemetry::hub().record_audio_error(&err, "stop path");
            }

            let stats = run.counters.snapshot();
            tracing::info!(
                "[DetectionEngine] {} stopped: {} blocks, {} strokes, {} measurements, {} unrefined",
                run.run_id,
                stats.blocks,
                stats.strokes,
                stats.measurements,
                stats.dropped_windows
            );
            telemetry::hub().record_run_summary(run.run_id, stats);
            self.last_summary = Some((run.run_id, stats));
            telemetry::hub().record_phase(LifecyclePhase::DetectionStopped);
        }
        self.status = EngineStatus::Idle;
    }

    fn fail(&mut self, err: AudioError, context: &str) -> AudioError {
        log_audio_error(&err, &format!("DetectionEngine::start ({})", context));
        telemetry::hub().record_audio_error(&err, context);
        telemetry::hub().record_phase(LifecyclePhase::DetectionFailed);
        self.status = EngineStatus::Error;
        self.last_error = Some(err.clone());
        err
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Merge a partial update and forward the full result to the active path.
    pub fn update_config(&mut self, patch: DetectorConfigPatch) {
        self.config = self.config.merged(&patch);
        if let Some(active) = self.active.as_mut() {
            active.path.configure(self.config);
        }
    }

    pub fn config(&self) -> DetectorConfig {
        self.config
    }

    // ========================================================================
    // STATE & EVENTS
    // ========================================================================

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&AudioError> {
        self.last_error.as_ref()
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|run| run.run_id)
    }

    pub fn active_path(&self) -> Option<PathKind> {
        self.active.as_ref().map(|run| run.path.kind())
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.active.as_ref().map(|run| run.sample_rate)
    }

    pub fn stats(&self) -> Option<DetectorStats> {
        self.active.as_ref().map(|run| run.counters.snapshot())
    }

    /// Final counters of the most recently stopped run.
    pub fn last_run_stats(&self) -> Option<(RunId, DetectorStats)> {
        self.last_summary
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events.subscribe()
    }

    /// Event stream for async consumers. Lagged messages are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = DetectionEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|result| async move { result.ok() })
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward one event to subscribers, noting strokes in the diagnostics hub.
pub(crate) fn publish_event(events: &broadcast::Sender<DetectionEvent>, event: DetectionEvent) {
    if let DetectionEvent::Stroke(stroke) = &event {
        telemetry::hub().record_stroke(stroke);
    }
    // No subscribers is not an error.
    let _ = events.send(event);
}

#[cfg(test)]
mod tests;
