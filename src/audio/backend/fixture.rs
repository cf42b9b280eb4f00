//! Hardware-free capture for tests and offline runs.
//!
//! Two modes:
//! - manual: the caller pushes blocks through a [`FixtureFeeder`]; the sink
//!   runs synchronously on the caller's thread
//! - streaming: a thread replays a sample buffer in fixed-size blocks, then
//!   reports completion through [`FixtureProgress`]
//!
//! Either mode can simulate a denied permission, a missing device or a
//! device that negotiates but then refuses to open, and can advertise or
//! withhold isolated processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{BlockSink, CaptureBackend, CaptureFormat, CaptureRequest, CaptureStream, SampleKind};
use crate::error::AudioError;

/// Simulated outcome of the permission / device check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureAccess {
    Granted,
    PermissionDenied,
    NoInputDevice,
    /// Negotiation succeeds but opening the stream fails.
    OpenFails,
}

type SinkSlot = Arc<Mutex<Option<BlockSink>>>;

enum FixtureMode {
    Manual(SinkSlot),
    Streaming {
        samples: Arc<Vec<f32>>,
        block_size: usize,
        pacing: Option<Duration>,
        progress: FixtureProgress,
    },
}

pub struct FixtureBackend {
    sample_rate: u32,
    access: Mutex<FixtureAccess>,
    isolated_processing: bool,
    mode: FixtureMode,
}

impl FixtureBackend {
    /// Backend driven block by block from the returned feeder.
    pub fn manual(sample_rate: u32) -> (Self, FixtureFeeder) {
        let slot: SinkSlot = Arc::new(Mutex::new(None));
        let backend = Self {
            sample_rate,
            access: Mutex::new(FixtureAccess::Granted),
            isolated_processing: true,
            mode: FixtureMode::Manual(Arc::clone(&slot)),
        };
        (backend, FixtureFeeder { slot })
    }

    /// Backend that replays `samples` in `block_size` chunks on open.
    pub fn streaming(samples: Vec<f32>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            access: Mutex::new(FixtureAccess::Granted),
            isolated_processing: true,
            mode: FixtureMode::Streaming {
                samples: Arc::new(samples),
                block_size: block_size.max(1),
                pacing: None,
                progress: FixtureProgress::default(),
            },
        }
    }

    pub fn with_access(self, access: FixtureAccess) -> Self {
        self.set_access(access);
        self
    }

    pub fn with_isolated_processing(mut self, isolated: bool) -> Self {
        self.isolated_processing = isolated;
        self
    }

    /// Sleep between streamed blocks to mimic a live device.
    pub fn with_pacing(mut self, delay: Duration) -> Self {
        if let FixtureMode::Streaming { pacing, .. } = &mut self.mode {
            *pacing = Some(delay);
        }
        self
    }

    /// Change the simulated access outcome for later `start` calls.
    pub fn set_access(&self, access: FixtureAccess) {
        if let Ok(mut guard) = self.access.lock() {
            *guard = access;
        }
    }

    fn access(&self) -> Result<FixtureAccess, AudioError> {
        self.access
            .lock()
            .map(|guard| *guard)
            .map_err(|_| AudioError::LockPoisoned {
                component: "fixture access".to_string(),
            })
    }

    /// Completion handle for streaming mode.
    pub fn progress(&self) -> Option<FixtureProgress> {
        match &self.mode {
            FixtureMode::Streaming { progress, .. } => Some(progress.clone()),
            FixtureMode::Manual(_) => None,
        }
    }
}

impl CaptureBackend for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn negotiate(&self, _request: &CaptureRequest) -> Result<CaptureFormat, AudioError> {
        match self.access()? {
            FixtureAccess::PermissionDenied => Err(AudioError::PermissionDenied),
            FixtureAccess::NoInputDevice => Err(AudioError::NoInputDevice),
            FixtureAccess::Granted | FixtureAccess::OpenFails => Ok(CaptureFormat {
                sample_rate: self.sample_rate,
                channels: 1,
                sample_kind: SampleKind::F32,
                isolated_processing: self.isolated_processing,
                max_block_frames: None,
            }),
        }
    }

    fn open(
        &self,
        _format: &CaptureFormat,
        sink: BlockSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        if self.access()? == FixtureAccess::OpenFails {
            return Err(AudioError::StreamOpenFailed {
                reason: "fixture configured to fail on open".to_string(),
            });
        }
        match &self.mode {
            FixtureMode::Manual(slot) => {
                let mut guard = slot.lock().map_err(|_| AudioError::LockPoisoned {
                    component: "fixture sink".to_string(),
                })?;
                *guard = Some(sink);
                Ok(Box::new(ManualStream {
                    slot: Arc::clone(slot),
                }))
            }
            FixtureMode::Streaming {
                samples,
                block_size,
                pacing,
                progress,
            } => {
                progress.reset();
                let stop = Arc::new(AtomicBool::new(false));
                let thread = spawn_replay(
                    Arc::clone(samples),
                    *block_size,
                    *pacing,
                    progress.clone(),
                    Arc::clone(&stop),
                    sink,
                )?;
                Ok(Box::new(StreamingStream {
                    stop,
                    thread: Some(thread),
                }))
            }
        }
    }
}

fn spawn_replay(
    samples: Arc<Vec<f32>>,
    block_size: usize,
    pacing: Option<Duration>,
    progress: FixtureProgress,
    stop: Arc<AtomicBool>,
    mut sink: BlockSink,
) -> Result<JoinHandle<()>, AudioError> {
    let handle = thread::Builder::new()
        .name("fixture-capture".to_string())
        .spawn(move || {
            for block in samples.chunks(block_size) {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                sink(block);
                if let Some(delay) = pacing {
                    thread::sleep(delay);
                }
            }
            progress.mark_done();
        })?;
    Ok(handle)
}

/// Pushes blocks into a manual fixture stream.
#[derive(Clone)]
pub struct FixtureFeeder {
    slot: SinkSlot,
}

impl FixtureFeeder {
    /// Deliver one block. Returns false when no stream is open.
    pub fn feed(&self, block: &[f32]) -> bool {
        match self.slot.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(sink) => {
                    sink(block);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

struct ManualStream {
    slot: SinkSlot,
}

impl CaptureStream for ManualStream {
    fn close(&mut self) -> Result<(), AudioError> {
        let mut guard = self.slot.lock().map_err(|_| AudioError::LockPoisoned {
            component: "fixture sink".to_string(),
        })?;
        guard.take();
        Ok(())
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct StreamingStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for StreamingStream {
    fn close(&mut self) -> Result<(), AudioError> {
        self.stop.store(true, Ordering::Relaxed);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| AudioError::StreamFailure {
                reason: "fixture replay thread panicked".to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for StreamingStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Signals when a streaming fixture has delivered every block.
#[derive(Clone, Default)]
pub struct FixtureProgress {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl FixtureProgress {
    fn reset(&self) {
        if let Ok(mut done) = self.inner.0.lock() {
            *done = false;
        }
    }

    fn mark_done(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut done) = lock.lock() {
            *done = true;
            cvar.notify_all();
        }
    }

    /// Block until the replay finishes or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let Ok(guard) = lock.lock() else {
            return false;
        };
        match cvar.wait_timeout_while(guard, timeout, |done| !*done) {
            Ok((done, _)) => *done,
            Err(_) => false,
        }
    }
}
