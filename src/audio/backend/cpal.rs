//! Desktop capture through cpal.

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ::cpal::{
    BuildStreamError, DefaultStreamConfigError, Device, SampleFormat, SampleRate,
    SupportedBufferSize, SupportedStreamConfig,
};

use super::{BlockSink, CaptureBackend, CaptureFormat, CaptureRequest, CaptureStream, SampleKind};
use crate::analysis::frame::Downmixer;
use crate::audio::stream_host::HostedStream;
use crate::error::AudioError;

/// Scratch size for downmixing when the device does not report a buffer size.
const FALLBACK_SCRATCH_FRAMES: usize = 4096;

/// Buffer sizes above this are too coarse to run detection in the callback.
const MAX_ISOLATED_FRAMES: u32 = 4096;

#[derive(Debug, Default)]
pub struct CpalBackend {
    _unit: (),
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn default_device() -> Result<Device, AudioError> {
    ::cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)
}

/// Prefer a native mono F32 config at the requested rate, then any config
/// covering the rate, then whatever the device calls its default.
fn choose_config(device: &Device, request: &CaptureRequest) -> Result<SupportedStreamConfig, AudioError> {
    let wanted = SampleRate(request.sample_rate);
    if let Ok(ranges) = device.supported_input_configs() {
        let mut candidates: Vec<_> = ranges
            .filter(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate())
            .filter(|range| sample_kind(range.sample_format()).is_some())
            .collect();
        candidates.sort_by_key(|range| {
            (
                range.channels() != request.channels,
                range.sample_format() != SampleFormat::F32,
            )
        });
        if let Some(best) = candidates.into_iter().next() {
            return Ok(best.with_sample_rate(wanted));
        }
    }

    device.default_input_config().map_err(map_default_config_error)
}

fn sample_kind(format: SampleFormat) -> Option<SampleKind> {
    match format {
        SampleFormat::F32 => Some(SampleKind::F32),
        SampleFormat::I16 => Some(SampleKind::I16),
        SampleFormat::U16 => Some(SampleKind::U16),
        _ => None,
    }
}

fn looks_like_permission(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
}

fn map_default_config_error(err: DefaultStreamConfigError) -> AudioError {
    match err {
        DefaultStreamConfigError::DeviceNotAvailable => AudioError::NoInputDevice,
        DefaultStreamConfigError::BackendSpecific { err } if looks_like_permission(&err.description) => {
            AudioError::PermissionDenied
        }
        other => AudioError::StreamOpenFailed {
            reason: other.to_string(),
        },
    }
}

fn map_build_error(err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => AudioError::NoInputDevice,
        BuildStreamError::BackendSpecific { err } if looks_like_permission(&err.description) => {
            AudioError::PermissionDenied
        }
        BuildStreamError::StreamConfigNotSupported => AudioError::UnsupportedFormat {
            format: "stream config not supported".to_string(),
        },
        other => AudioError::StreamOpenFailed {
            reason: other.to_string(),
        },
    }
}

impl CaptureBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn negotiate(&self, request: &CaptureRequest) -> Result<CaptureFormat, AudioError> {
        let device = default_device()?;
        let config = choose_config(&device, request)?;
        let kind = sample_kind(config.sample_format()).ok_or_else(|| AudioError::UnsupportedFormat {
            format: format!("{:?}", config.sample_format()),
        })?;

        let max_block_frames = match config.buffer_size() {
            SupportedBufferSize::Range { max, .. } => Some(*max),
            SupportedBufferSize::Unknown => None,
        };
        let isolated_processing = matches!(max_block_frames, Some(max) if max <= MAX_ISOLATED_FRAMES);

        tracing::info!(
            "[CpalBackend] Negotiated {} Hz, {} ch, {:?}, max block {:?}",
            config.sample_rate().0,
            config.channels(),
            kind,
            max_block_frames
        );

        Ok(CaptureFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            sample_kind: kind,
            isolated_processing,
            max_block_frames,
        })
    }

    fn open(
        &self,
        format: &CaptureFormat,
        sink: BlockSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let format = *format;
        let hosted = HostedStream::spawn("cpal-capture", move || build_stream(format, sink))?;
        Ok(Box::new(hosted))
    }
}

fn build_stream(format: CaptureFormat, mut sink: BlockSink) -> Result<::cpal::Stream, AudioError> {
    let device = default_device()?;
    let config = ::cpal::StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: ::cpal::BufferSize::Default,
    };
    let scratch = format
        .max_block_frames
        .map(|frames| frames as usize)
        .unwrap_or(FALLBACK_SCRATCH_FRAMES);
    let mut mixer = Downmixer::new(format.channels as usize, scratch);

    let err_fn = |err| tracing::error!("[CpalBackend] Input stream error: {}", err);

    let stream = match format.sample_kind {
        SampleKind::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &::cpal::InputCallbackInfo| {
                mixer.process(data, |mono| sink(mono));
            },
            err_fn,
            None,
        ),
        SampleKind::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &::cpal::InputCallbackInfo| {
                mixer.process_with(data, |s| s as f32 / 32_768.0, |mono| sink(mono));
            },
            err_fn,
            None,
        ),
        SampleKind::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &::cpal::InputCallbackInfo| {
                mixer.process_with(
                    data,
                    |s| (s as f32 - 32_768.0) / 32_768.0,
                    |mono| sink(mono),
                );
            },
            err_fn,
            None,
        ),
    }
    .map_err(map_build_error)?;

    stream.play().map_err(|e| AudioError::HardwareError {
        details: format!("Input start failed: {}", e),
    })?;

    Ok(stream)
}
