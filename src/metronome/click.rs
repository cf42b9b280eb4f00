//! Click synthesis
//!
//! A click is a sine tone shaped by an exponential envelope: a 1 ms rise from
//! a 1e-4 floor to the peak gain, then an 80 ms fall back to the floor. Both
//! endpoints stay strictly positive so the exponential ramps are defined.
//!
//! [`ClickRenderer`] runs inside the output callback. Commands arrive through
//! an `rtrb` ring and occupy a fixed set of voice slots, so rendering never
//! allocates.

use std::f64::consts::TAU;

use rtrb::Consumer;

pub const ENVELOPE_FLOOR: f32 = 1e-4;
pub const ATTACK_SECONDS: f64 = 0.001;
pub const DECAY_SECONDS: f64 = 0.08;
pub const ACCENT_HZ: f64 = 1500.0;
pub const REGULAR_HZ: f64 = 1000.0;

/// Simultaneously sounding clicks per renderer.
pub const MAX_VOICES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickEnvelope {
    pub peak: f32,
    pub frequency_hz: f64,
}

impl ClickEnvelope {
    pub fn new(volume: f32, is_accent: bool) -> Self {
        Self {
            peak: volume.max(ENVELOPE_FLOOR),
            frequency_hz: if is_accent { ACCENT_HZ } else { REGULAR_HZ },
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        ATTACK_SECONDS + DECAY_SECONDS
    }

    /// Envelope gain `t` seconds into the click; zero outside the click.
    pub fn gain_at(&self, t: f64) -> f32 {
        if !(0.0..self.duration_seconds()).contains(&t) {
            return 0.0;
        }
        let floor = ENVELOPE_FLOOR as f64;
        let peak = self.peak as f64;
        let gain = if t < ATTACK_SECONDS {
            floor * (peak / floor).powf(t / ATTACK_SECONDS)
        } else {
            peak * (floor / peak).powf((t - ATTACK_SECONDS) / DECAY_SECONDS)
        };
        gain as f32
    }

    pub fn sample_at(&self, t: f64) -> f32 {
        self.gain_at(t) * (TAU * self.frequency_hz * t).sin() as f32
    }
}

/// A click to start at an absolute output frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickCommand {
    pub start_frame: u64,
    pub envelope: ClickEnvelope,
}

/// Mixes queued clicks into mono output, frame by frame.
pub struct ClickRenderer {
    sample_rate: f64,
    commands: Consumer<ClickCommand>,
    voices: [Option<ClickCommand>; MAX_VOICES],
    click_frames: u64,
    stolen: u64,
}

impl ClickRenderer {
    pub fn new(sample_rate: u32, commands: Consumer<ClickCommand>) -> Self {
        let sample_rate = sample_rate.max(1) as f64;
        Self {
            sample_rate,
            commands,
            voices: [None; MAX_VOICES],
            click_frames: ((ATTACK_SECONDS + DECAY_SECONDS) * sample_rate).ceil() as u64,
            stolen: 0,
        }
    }

    /// Move queued commands into voice slots. Call once per callback.
    pub fn poll_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            let slot = match self.voices.iter().position(Option::is_none) {
                Some(free) => free,
                None => {
                    // Replace the voice that started earliest.
                    self.stolen += 1;
                    self.voices
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, v)| v.map(|c| c.start_frame).unwrap_or(0))
                        .map(|(i, _)| i)
                        .unwrap_or(0)
                }
            };
            self.voices[slot] = Some(command);
        }
    }

    /// Mono output value at absolute frame `frame`.
    pub fn next_sample(&mut self, frame: u64) -> f32 {
        let mut mix = 0.0;
        for voice in self.voices.iter_mut() {
            let Some(command) = voice else { continue };
            if frame < command.start_frame {
                continue;
            }
            let offset = frame - command.start_frame;
            if offset >= self.click_frames {
                *voice = None;
                continue;
            }
            mix += command.envelope.sample_at(offset as f64 / self.sample_rate);
        }
        mix.clamp(-1.0, 1.0)
    }

    /// Fill an interleaved buffer starting at `first_frame`.
    pub fn render(&mut self, out: &mut [f32], channels: usize, first_frame: u64) {
        let channels = channels.max(1);
        self.poll_commands();
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let value = self.next_sample(first_frame + i as u64);
            frame.fill(value);
        }
    }

    pub fn stolen_voices(&self) -> u64 {
        self.stolen
    }
}

/// Frame at which a beat scheduled for `seconds` starts.
#[inline]
pub fn seconds_to_frame(seconds: f64, sample_rate: u32) -> u64 {
    (seconds.max(0.0) * sample_rate as f64).round() as u64
}
