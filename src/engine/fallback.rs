//! Fallback path: the capture callback only copies samples into pooled
//! buffers; a worker thread runs the detector and publishes events directly.
//!
//! Used when the backend cannot guarantee bounded real-time callbacks. The
//! arithmetic is the same [`StrokeDetector`] the real-time path runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::broadcast;

use super::config_slot::{config_slot, ConfigReader, ConfigWriter};
use super::path::{DetectionPath, PathKind};
use super::publish_event;
use crate::analysis::{DetectionEvent, StrokeDetector};
use crate::audio::backend::BlockSink;
use crate::audio::buffer_pool::{BlockPool, PooledBlock, WorkerSide};
use crate::config::{AudioConfig, DetectorConfig};
use crate::error::AudioError;
use crate::telemetry;

const IDLE_SLEEP: Duration = Duration::from_millis(1);
const OCCUPANCY_CHANNEL: &str = "fallback_pool";

pub struct FallbackPath {
    config_tx: ConfigWriter,
    dropped_samples: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FallbackPath {
    pub fn spawn(
        detector: StrokeDetector,
        events: broadcast::Sender<DetectionEvent>,
        audio: &AudioConfig,
    ) -> Result<(Self, BlockSink), AudioError> {
        let (mut capture, worker_side) = BlockPool::new(audio.buffer_pool_size, audio.buffer_size);
        let (config_tx, config_rx) = config_slot(*detector.config());
        let dropped_samples = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let shutdown = Arc::clone(&shutdown);
            let worker = FallbackWorker {
                detector,
                blocks: worker_side,
                config_rx,
                events,
                shutdown,
            };
            thread::Builder::new()
                .name("stroke-fallback".to_string())
                .spawn(move || worker.run())?
        };

        let callback_drops = Arc::clone(&dropped_samples);
        let sink: BlockSink = Box::new(move |block: &[f32]| {
            let outcome = capture.submit(block);
            if outcome.samples_dropped > 0 {
                callback_drops.fetch_add(outcome.samples_dropped as u64, Ordering::Relaxed);
            }
        });

        Ok((
            Self {
                config_tx,
                dropped_samples,
                shutdown,
                worker: Some(worker),
            },
            sink,
        ))
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }
}

struct FallbackWorker {
    detector: StrokeDetector,
    blocks: WorkerSide,
    config_rx: ConfigReader,
    events: broadcast::Sender<DetectionEvent>,
    shutdown: Arc<AtomicBool>,
}

impl FallbackWorker {
    fn run(mut self) {
        tracing::debug!("[FallbackWorker] Started for {}", self.detector.run_id());
        loop {
            match self.blocks.next_block() {
                Some(block) => {
                    self.handle(&block);
                    self.blocks.recycle(block);
                    telemetry::hub()
                        .record_buffer_occupancy(OCCUPANCY_CHANNEL, self.blocks.occupancy_percent());
                }
                None => {
                    if self.blocks.is_drained() || self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    thread::sleep(IDLE_SLEEP);
                }
            }
        }
        tracing::debug!("[FallbackWorker] Exiting for {}", self.detector.run_id());
    }

    fn handle(&mut self, block: &PooledBlock) {
        // Read after the pop: anything sent before this block was captured
        // is visible by now.
        if let Some(config) = self.config_rx.take_latest() {
            self.detector.set_config(config);
        }
        if block.gap_before > 0 {
            self.detector.skip_samples(block.gap_before);
        }
        let events = &self.events;
        self.detector
            .process_block(&block.samples, &mut |event| publish_event(events, event));
    }
}

impl DetectionPath for FallbackPath {
    fn kind(&self) -> PathKind {
        PathKind::Fallback
    }

    fn configure(&mut self, config: DetectorConfig) {
        self.config_tx.write(config);
    }

    fn shutdown(&mut self) -> Result<(), AudioError> {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| AudioError::StreamFailure {
                reason: "fallback worker panicked".to_string(),
            })?;
            telemetry::hub().record_overflow("fallback_samples", self.dropped_samples());
        }
        Ok(())
    }
}

impl Drop for FallbackPath {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RunId;
    use crate::audio::buffer_pool::CaptureSide;

    const SR: u32 = 48_000;
    const BLOCK: usize = 240;

    type Harness = (
        CaptureSide,
        FallbackWorker,
        ConfigWriter,
        broadcast::Receiver<DetectionEvent>,
    );

    fn worker_with_pool(count: usize) -> Harness {
        let config = DetectorConfig {
            telemetry_probability: 0.0,
            ..DetectorConfig::default()
        };
        let detector = StrokeDetector::new(RunId(7), SR, config);
        let (capture, blocks) = BlockPool::new(count, BLOCK);
        let (config_tx, config_rx) = config_slot(*detector.config());
        let (events, rx) = broadcast::channel(64);
        let worker = FallbackWorker {
            detector,
            blocks,
            config_rx,
            events,
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        (capture, worker, config_tx, rx)
    }

    fn drain_worker(worker: &mut FallbackWorker) {
        while let Some(block) = worker.blocks.next_block() {
            worker.handle(&block);
            worker.blocks.recycle(block);
        }
    }

    #[test]
    fn dropped_samples_still_advance_the_audio_clock() {
        let (mut capture, mut worker, _config, mut rx) = worker_with_pool(2);
        let quiet = [0.001f32; BLOCK];

        assert_eq!(capture.submit(&quiet).blocks_queued, 1);
        assert_eq!(capture.submit(&quiet).blocks_queued, 1);
        // Worker stalled: three blocks' worth of samples have nowhere to go.
        for _ in 0..3 {
            assert_eq!(capture.submit(&quiet).samples_dropped, BLOCK);
        }
        drain_worker(&mut worker);

        assert_eq!(capture.submit(&[0.5; BLOCK]).blocks_queued, 1);
        drain_worker(&mut worker);

        let stroke = rx
            .try_recv()
            .ok()
            .and_then(|event| event.as_stroke().copied())
            .expect("stroke after the gap");
        let captured_before = 5 * BLOCK;
        let expected_ms = captured_before as f64 * 1000.0 / SR as f64;
        assert!((stroke.occurred_at_ms - expected_ms).abs() < 1e-9);
        assert_eq!(worker.detector.counters().snapshot().samples, 3 * BLOCK as u64);
    }

    #[test]
    fn only_the_newest_config_reaches_the_worker() {
        let (mut capture, mut worker, mut config_tx, mut rx) = worker_with_pool(4);
        capture.submit(&[0.001; BLOCK]);
        drain_worker(&mut worker);

        let strict = DetectorConfig {
            sensitivity: 30.0,
            telemetry_probability: 0.0,
            ..DetectorConfig::default()
        };
        for _ in 0..100 {
            config_tx.write(strict);
        }
        config_tx.write(DetectorConfig {
            sensitivity: 1.0,
            ..strict
        });

        capture.submit(&[0.5; BLOCK]);
        drain_worker(&mut worker);
        assert_eq!(worker.detector.config().sensitivity, 1.0);
        let stroke = rx
            .try_recv()
            .ok()
            .and_then(|event| event.as_stroke().copied())
            .expect("loud block is a stroke");
        assert!((stroke.threshold_db - (stroke.floor_db + 6.0)).abs() < 1e-4);
    }

    #[test]
    fn shutdown_joins_worker_while_capture_side_is_alive() {
        let (events, _rx) = broadcast::channel(8);
        let detector = StrokeDetector::new(RunId(9), SR, DetectorConfig::default());
        let (mut path, sink) = FallbackPath::spawn(detector, events, &AudioConfig::default())
            .expect("spawn fallback path");
        path.shutdown().expect("worker joined");
        assert!(path.worker.is_none());
        path.shutdown().expect("second shutdown is a no-op");
        drop(sink);
    }
}
