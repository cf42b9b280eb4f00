//! Capture backends.
//!
//! A backend negotiates a capture format with the platform and then opens a
//! stream that delivers mono `f32` blocks to a [`BlockSink`]. The sink runs on
//! whatever thread the platform uses for its audio callback.

use std::sync::Arc;

use crate::config::AudioConfig;
use crate::error::AudioError;

mod fixture;
pub use fixture::{FixtureAccess, FixtureBackend, FixtureFeeder, FixtureProgress};

cfg_if::cfg_if! {
    if #[cfg(target_os = "android")] {
        mod oboe;
        pub use self::oboe::OboeBackend;
    } else {
        mod cpal;
        pub use self::cpal::CpalBackend;
    }
}

/// Receives mono blocks from the capture callback.
pub type BlockSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// What the engine asks the platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub sample_rate: u32,
    pub channels: u16,
    /// Echo cancellation, noise suppression and AGC. Always off for detection.
    pub voice_processing: bool,
}

impl CaptureRequest {
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: 1,
            voice_processing: false,
        }
    }
}

/// Sample type delivered by the device before conversion to `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    F32,
    I16,
    U16,
}

/// What the platform actually granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    /// Device channel count; backends downmix to mono before the sink.
    pub channels: u16,
    pub sample_kind: SampleKind,
    /// Whether the callback runs on a real-time thread with bounded block
    /// sizes, so detection can run inside it.
    pub isolated_processing: bool,
    /// Largest block the callback is expected to deliver, when known.
    pub max_block_frames: Option<u32>,
}

/// Open capture stream. Dropping it also closes it.
pub trait CaptureStream: Send {
    /// Stop the stream and release the device. Idempotent.
    fn close(&mut self) -> Result<(), AudioError>;
}

impl CaptureStream for crate::audio::stream_host::HostedStream {
    fn close(&mut self) -> Result<(), AudioError> {
        crate::audio::stream_host::HostedStream::close(self)
    }
}

/// Trait implemented by platform-specific capture backends.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve the capture format. This is where permission and device
    /// presence are checked.
    fn negotiate(&self, request: &CaptureRequest) -> Result<CaptureFormat, AudioError>;

    /// Start delivering blocks to `sink`.
    fn open(
        &self,
        format: &CaptureFormat,
        sink: BlockSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// Platform default backend.
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "android")] {
            Arc::new(OboeBackend::new())
        } else {
            Arc::new(CpalBackend::new())
        }
    }
}
