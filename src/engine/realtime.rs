//! Real-time path: detection runs inside the capture callback.
//!
//! ```text
//! control ──config slot──▶ capture callback (StrokeDetector)
//!                                 │
//!                           event ring
//!                                 ▼
//!                         dispatcher thread ──▶ broadcast subscribers
//! ```
//!
//! The callback never blocks or allocates. Config arrives through a
//! latest-value slot; events leave as `Copy` values over a ring, and a full
//! ring drops the event and bumps a counter instead of waiting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::{Consumer, RingBuffer};
use tokio::sync::broadcast;

use super::config_slot::{config_slot, ConfigWriter};
use super::path::{DetectionPath, PathKind};
use super::publish_event;
use crate::analysis::{DetectionEvent, StrokeDetector};
use crate::audio::backend::BlockSink;
use crate::config::{AudioConfig, DetectorConfig};
use crate::error::AudioError;
use crate::telemetry;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct RealtimePath {
    config_tx: ConfigWriter,
    dropped_events: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl RealtimePath {
    /// Build the path and the sink to install in the capture stream.
    pub fn spawn(
        mut detector: StrokeDetector,
        events: broadcast::Sender<DetectionEvent>,
        audio: &AudioConfig,
    ) -> Result<(Self, BlockSink), AudioError> {
        let (config_tx, mut config_rx) = config_slot(*detector.config());
        let (mut event_tx, event_rx) =
            RingBuffer::<DetectionEvent>::new(audio.event_queue_capacity.max(1));
        let dropped_events = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("stroke-dispatch".to_string())
                .spawn(move || dispatch_loop(event_rx, events, shutdown))?
        };

        let callback_drops = Arc::clone(&dropped_events);
        let sink: BlockSink = Box::new(move |block: &[f32]| {
            if let Some(config) = config_rx.take_latest() {
                detector.set_config(config);
            }
            detector.process_block(block, &mut |event| {
                if event_tx.push(event).is_err() {
                    callback_drops.fetch_add(1, Ordering::Relaxed);
                }
            });
        });

        Ok((
            Self {
                config_tx,
                dropped_events,
                shutdown,
                dispatcher: Some(dispatcher),
            },
            sink,
        ))
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

fn dispatch_loop(
    mut event_rx: Consumer<DetectionEvent>,
    events: broadcast::Sender<DetectionEvent>,
    shutdown: Arc<AtomicBool>,
) {
    tracing::debug!("[RealtimePath] Dispatcher started");
    loop {
        match event_rx.pop() {
            Ok(event) => publish_event(&events, event),
            Err(_) => {
                let producer_gone = event_rx.is_abandoned();
                if (producer_gone || shutdown.load(Ordering::Acquire)) && event_rx.is_empty() {
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
    tracing::debug!("[RealtimePath] Dispatcher exiting");
}

impl DetectionPath for RealtimePath {
    fn kind(&self) -> PathKind {
        PathKind::Realtime
    }

    fn configure(&mut self, config: DetectorConfig) {
        self.config_tx.write(config);
    }

    fn shutdown(&mut self) -> Result<(), AudioError> {
        self.shutdown.store(true, Ordering::Release);
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.join().map_err(|_| AudioError::StreamFailure {
                reason: "event dispatcher panicked".to_string(),
            })?;
            telemetry::hub().record_overflow("realtime_events", self.dropped_events());
        }
        Ok(())
    }
}

impl Drop for RealtimePath {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
