//! Fixture utilities for offline detection runs.
//!
//! Loads WAV input, synthesizes stroke tracks with known onset times, and
//! checks detected strokes against JSON expectations. Desktop-focused; used by
//! the CLI harness and integration tests.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::analysis::frame::Downmixer;
use crate::analysis::StrokeEvent;

const DOWNMIX_CHUNK_FRAMES: usize = 4096;

/// Decoded mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl FixtureAudio {
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate.max(1) as f64
    }
}

/// Read a PCM or float WAV file, averaging channels down to mono.
pub fn load_wav(path: &Path) -> Result<FixtureAudio> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            if !(8..=32).contains(&spec.bits_per_sample) {
                return Err(anyhow!(
                    "Unsupported bits per sample {} in {}",
                    spec.bits_per_sample,
                    path.display()
                ));
            }
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| {
                    sample
                        .map(|value| value as f32 / scale)
                        .map_err(|err| anyhow!(err))
                })
                .collect::<Result<Vec<f32>>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        let mut mono = Vec::with_capacity(interleaved.len() / channels);
        let mut mixer = Downmixer::new(channels, DOWNMIX_CHUNK_FRAMES);
        mixer.process(&interleaved, |chunk| mono.extend_from_slice(chunk));
        mono
    };

    tracing::debug!(
        "[Fixtures] Loaded {} ({} Hz, {} ch, {} frames)",
        path.display(),
        spec.sample_rate,
        channels,
        samples.len()
    );

    Ok(FixtureAudio {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Write mono samples as a 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Parameters for a synthetic stroke track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSpec {
    pub sample_rate: u32,
    pub duration_ms: f64,
    /// Onset times of the strokes
    pub hits_ms: Vec<f64>,
    pub hit_amplitude: f32,
    /// Time constant of each stroke's exponential decay
    pub hit_decay_ms: f64,
    pub noise_amplitude: f32,
    pub seed: u64,
}

impl Default for SynthSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            duration_ms: 2_000.0,
            hits_ms: vec![500.0, 1_000.0, 1_500.0],
            hit_amplitude: 0.6,
            hit_decay_ms: 15.0,
            noise_amplitude: 0.002,
            seed: 42,
        }
    }
}

impl SynthSpec {
    /// Evenly spaced hits starting at `first_ms`.
    pub fn evenly_spaced(count: usize, first_ms: f64, spacing_ms: f64) -> Self {
        let hits_ms = (0..count).map(|i| first_ms + i as f64 * spacing_ms).collect();
        let last = first_ms + count.saturating_sub(1) as f64 * spacing_ms;
        Self {
            hits_ms,
            duration_ms: last + spacing_ms.max(250.0),
            ..Self::default()
        }
    }
}

/// Uniform noise plus decaying noise bursts at each hit time. Deterministic
/// for a given seed.
pub fn synth_strokes(spec: &SynthSpec) -> Vec<f32> {
    let sr = spec.sample_rate.max(1) as f64;
    let total = (spec.duration_ms * sr / 1000.0).round().max(0.0) as usize;
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let noise = spec.noise_amplitude.abs();

    let mut samples: Vec<f32> = (0..total)
        .map(|_| {
            if noise > 0.0 {
                rng.gen_range(-noise..noise)
            } else {
                0.0
            }
        })
        .collect();

    let decay_samples = (spec.hit_decay_ms.max(0.1) * sr / 1000.0).max(1.0);
    let tail = (decay_samples * 8.0) as usize;
    for &hit in &spec.hits_ms {
        let start = (hit * sr / 1000.0).round().max(0.0) as usize;
        let end = start.saturating_add(tail).min(total);
        for (offset, sample) in samples[start.min(total)..end].iter_mut().enumerate() {
            let envelope = (-(offset as f64) / decay_samples).exp() as f32;
            let carrier = if rng.gen::<bool>() { 1.0 } else { -1.0 };
            *sample += spec.hit_amplitude * envelope * carrier;
        }
    }

    for sample in samples.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
    samples
}

/// Expected stroke onsets for a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeExpectations {
    pub strokes_ms: Vec<f64>,
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: f64,
}

fn default_tolerance_ms() -> f64 {
    10.0
}

/// Mismatch between expected and detected strokes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectationDiff {
    pub expected: usize,
    pub detected: usize,
    pub failures: Vec<String>,
}

impl StrokeExpectations {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_synth(spec: &SynthSpec) -> Self {
        Self {
            strokes_ms: spec.hits_ms.clone(),
            tolerance_ms: default_tolerance_ms(),
        }
    }

    /// Compare in order; each detected stroke must fall within tolerance of
    /// its expected time.
    pub fn verify(&self, detected: &[StrokeEvent]) -> std::result::Result<(), ExpectationDiff> {
        let mut failures = Vec::new();
        for (idx, expected) in self.strokes_ms.iter().enumerate() {
            match detected.get(idx) {
                Some(stroke) => {
                    let delta = stroke.occurred_at_ms - expected;
                    if delta.abs() > self.tolerance_ms {
                        failures.push(format!(
                            "stroke #{} at {:.1} ms, expected {:.1} ms (delta {:+.1} ms)",
                            idx + 1,
                            stroke.occurred_at_ms,
                            expected,
                            delta
                        ));
                    }
                }
                None => failures.push(format!("missing stroke #{} at {:.1} ms", idx + 1, expected)),
            }
        }
        for (idx, extra) in detected.iter().enumerate().skip(self.strokes_ms.len()) {
            failures.push(format!(
                "unexpected stroke #{} at {:.1} ms",
                idx + 1,
                extra.occurred_at_ms
            ));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExpectationDiff {
                expected: self.strokes_ms.len(),
                detected: detected.len(),
                failures,
            })
        }
    }
}
