//! Device-backed metronome clock.
//!
//! The output callback renders committed clicks and advances a frame counter;
//! that counter is the clock. Clicks therefore land on exact frames no matter
//! how late the scheduling loop runs, as long as it stays inside the lookahead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Producer, RingBuffer};

use super::click::{seconds_to_frame, ClickCommand, ClickEnvelope, ClickRenderer};
use super::clock::{ClockFactory, MetronomeClock};
use super::scheduler::ScheduledBeat;
use crate::audio::stream_host::HostedStream;
use crate::error::AudioError;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Sample rate requested from the output device.
pub const PREFERRED_OUTPUT_RATE: u32 = 48_000;

pub struct OutputClock {
    sample_rate: u32,
    frames: Arc<AtomicU64>,
    commands: Producer<ClickCommand>,
    dropped: u64,
    stream: HostedStream,
}

impl OutputClock {
    pub fn open() -> Result<Self, AudioError> {
        let (commands, rx) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let frames = Arc::new(AtomicU64::new(0));
        let (stream, sample_rate) = platform::open_stream(rx, Arc::clone(&frames))?;
        tracing::info!("[OutputClock] Opened at {} Hz", sample_rate);
        Ok(Self {
            sample_rate,
            frames,
            commands,
            dropped: 0,
            stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl MetronomeClock for OutputClock {
    fn now_seconds(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, beat: &ScheduledBeat, volume: f32) {
        let command = ClickCommand {
            start_frame: seconds_to_frame(beat.scheduled_time_seconds, self.sample_rate),
            envelope: ClickEnvelope::new(volume, beat.is_accent),
        };
        if self.commands.push(command).is_err() {
            self.dropped += 1;
            tracing::warn!(
                "[OutputClock] Click queue full, beat {} dropped ({} total)",
                beat.beat_index,
                self.dropped
            );
        }
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.stream.close()
    }
}

/// Opens an [`OutputClock`] on the platform default output.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputClockFactory;

impl ClockFactory for OutputClockFactory {
    fn open(&self) -> Result<Box<dyn MetronomeClock>, AudioError> {
        Ok(Box::new(OutputClock::open()?))
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "android")] {
        mod platform {
            use super::*;
            use oboe::{
                AudioOutputCallback, AudioOutputStreamSafe, AudioStream, AudioStreamBuilder,
                DataCallbackResult, Mono, Output, PerformanceMode, SharingMode, Usage,
            };

            struct ClickCallback {
                renderer: ClickRenderer,
                frames: Arc<AtomicU64>,
            }

            impl AudioOutputCallback for ClickCallback {
                type FrameType = (f32, Mono);

                fn on_audio_ready(
                    &mut self,
                    _stream: &mut dyn AudioOutputStreamSafe,
                    out: &mut [f32],
                ) -> DataCallbackResult {
                    let start = self.frames.load(Ordering::Acquire);
                    self.renderer.render(out, 1, start);
                    self.frames.fetch_add(out.len() as u64, Ordering::Release);
                    DataCallbackResult::Continue
                }
            }

            pub(super) fn open_stream(
                commands: rtrb::Consumer<ClickCommand>,
                frames: Arc<AtomicU64>,
            ) -> Result<(HostedStream, u32), AudioError> {
                if !crate::android_context_ready() {
                    return Err(AudioError::ContextNotInitialized);
                }
                let sample_rate = PREFERRED_OUTPUT_RATE;
                let hosted = HostedStream::spawn("oboe-click", move || {
                    let mut stream = AudioStreamBuilder::default()
                        .set_performance_mode(PerformanceMode::LowLatency)
                        .set_sharing_mode(SharingMode::Shared)
                        .set_usage(Usage::Game)
                        .set_direction::<Output>()
                        .set_sample_rate(sample_rate as i32)
                        .set_channel_count::<Mono>()
                        .set_format::<f32>()
                        .set_callback(ClickCallback {
                            renderer: ClickRenderer::new(sample_rate, commands),
                            frames,
                        })
                        .open_stream()
                        .map_err(|e| AudioError::StreamOpenFailed {
                            reason: format!("{:?}", e),
                        })?;
                    stream.start().map_err(|e| AudioError::HardwareError {
                        details: format!("Output start failed: {:?}", e),
                    })?;
                    Ok(stream)
                })?;
                Ok((hosted, sample_rate))
            }
        }
    } else {
        mod platform {
            use super::*;
            use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
            use ::cpal::{FromSample, Sample, SampleFormat, SizedSample};

            fn default_device() -> Result<::cpal::Device, AudioError> {
                ::cpal::default_host()
                    .default_output_device()
                    .ok_or(AudioError::NoOutputDevice)
            }

            pub(super) fn open_stream(
                commands: rtrb::Consumer<ClickCommand>,
                frames: Arc<AtomicU64>,
            ) -> Result<(HostedStream, u32), AudioError> {
                let supported = default_device()?
                    .default_output_config()
                    .map_err(|e| AudioError::StreamOpenFailed {
                        reason: format!("Failed to get default output config: {}", e),
                    })?;
                let sample_rate = supported.sample_rate().0;
                let format = supported.sample_format();
                let config: ::cpal::StreamConfig = supported.into();

                let hosted = HostedStream::spawn("cpal-click", move || {
                    let device = default_device()?;
                    let renderer = ClickRenderer::new(sample_rate, commands);
                    let stream = match format {
                        SampleFormat::F32 => build::<f32>(&device, &config, renderer, frames),
                        SampleFormat::I16 => build::<i16>(&device, &config, renderer, frames),
                        SampleFormat::U16 => build::<u16>(&device, &config, renderer, frames),
                        other => {
                            return Err(AudioError::UnsupportedFormat {
                                format: format!("{:?}", other),
                            })
                        }
                    }?;
                    stream.play().map_err(|e| AudioError::HardwareError {
                        details: format!("Output start failed: {}", e),
                    })?;
                    Ok(stream)
                })?;
                Ok((hosted, sample_rate))
            }

            fn build<T>(
                device: &::cpal::Device,
                config: &::cpal::StreamConfig,
                mut renderer: ClickRenderer,
                frames: Arc<AtomicU64>,
            ) -> Result<::cpal::Stream, AudioError>
            where
                T: SizedSample + FromSample<f32>,
            {
                let channels = (config.channels as usize).max(1);
                let err_fn = |err| tracing::error!("[OutputClock] Output stream error: {}", err);
                device
                    .build_output_stream(
                        config,
                        move |data: &mut [T], _: &::cpal::OutputCallbackInfo| {
                            renderer.poll_commands();
                            let start = frames.load(Ordering::Acquire);
                            let mut count = 0u64;
                            for frame in data.chunks_mut(channels) {
                                let value = T::from_sample(renderer.next_sample(start + count));
                                frame.fill(value);
                                count += 1;
                            }
                            frames.fetch_add(count, Ordering::Release);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| AudioError::StreamOpenFailed {
                        reason: format!("{}", e),
                    })
            }
        }
    }
}
