//! Android capture through Oboe.
//!
//! Input uses the `Unprocessed` preset so the platform applies no echo
//! cancellation, noise suppression or gain control. Oboe data callbacks run
//! on a high-priority audio thread, so detection can run inside them.

use oboe::{
    AudioInputCallback, AudioInputStreamSafe, AudioStream, AudioStreamAsync, AudioStreamBuilder,
    DataCallbackResult, Input, InputPreset, PerformanceMode, SharingMode,
};

use super::{BlockSink, CaptureBackend, CaptureFormat, CaptureRequest, CaptureStream, SampleKind};
use crate::audio::stream_host::HostedStream;
use crate::error::AudioError;

/// Typical Oboe burst ceiling for low-latency input.
const MAX_BURST_FRAMES: u32 = 1024;

struct CaptureCallback {
    sink: BlockSink,
}

impl AudioInputCallback for CaptureCallback {
    type FrameType = (f32, oboe::Mono);

    fn on_audio_ready(
        &mut self,
        _stream: &mut dyn AudioInputStreamSafe,
        frames: &[f32],
    ) -> DataCallbackResult {
        (self.sink)(frames);
        DataCallbackResult::Continue
    }
}

#[derive(Debug, Default)]
pub struct OboeBackend {
    _unit: (),
}

impl OboeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureBackend for OboeBackend {
    fn name(&self) -> &'static str {
        "oboe"
    }

    fn negotiate(&self, request: &CaptureRequest) -> Result<CaptureFormat, AudioError> {
        if !crate::android_context_ready() {
            return Err(AudioError::ContextNotInitialized);
        }
        Ok(CaptureFormat {
            sample_rate: request.sample_rate,
            channels: 1,
            sample_kind: SampleKind::F32,
            isolated_processing: true,
            max_block_frames: Some(MAX_BURST_FRAMES),
        })
    }

    fn open(
        &self,
        format: &CaptureFormat,
        sink: BlockSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let sample_rate = format.sample_rate;
        let hosted = HostedStream::spawn("oboe-capture", move || open_input(sample_rate, sink))?;
        Ok(Box::new(hosted))
    }
}

fn open_input(
    sample_rate: u32,
    sink: BlockSink,
) -> Result<AudioStreamAsync<Input, CaptureCallback>, AudioError> {
    let mut stream = AudioStreamBuilder::default()
        .set_performance_mode(PerformanceMode::LowLatency)
        .set_sharing_mode(SharingMode::Exclusive)
        .set_direction::<Input>()
        .set_input_preset(InputPreset::Unprocessed)
        .set_sample_rate(sample_rate as i32)
        .set_channel_count::<oboe::Mono>()
        .set_format::<f32>()
        .set_callback(CaptureCallback { sink })
        .open_stream()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })?;

    stream.start().map_err(|e| AudioError::HardwareError {
        details: format!("Input start failed: {:?}", e),
    })?;
    Ok(stream)
}
