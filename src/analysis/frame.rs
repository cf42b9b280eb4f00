//! Per-block level metrics and channel downmixing.

/// Offset added before every log conversion so silence maps to a finite level.
pub const DB_EPSILON: f32 = 1e-9;

/// RMS and peak magnitude of one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetrics {
    pub rms: f32,
    pub peak_abs: f32,
}

impl FrameMetrics {
    pub fn rms_db(&self) -> f32 {
        to_db(self.rms)
    }

    pub fn peak_db(&self) -> f32 {
        to_db(self.peak_abs)
    }
}

/// Compute RMS and peak for a block. Returns `None` for an empty block.
///
/// The sum of squares accumulates in `f64` so long windows of quiet input do
/// not lose precision.
pub fn analyze(block: &[f32]) -> Option<FrameMetrics> {
    if block.is_empty() {
        return None;
    }

    let mut sum_sq = 0.0_f64;
    let mut peak = 0.0_f32;
    for &sample in block {
        sum_sq += (sample as f64) * (sample as f64);
        peak = peak.max(sample.abs());
    }

    Some(FrameMetrics {
        rms: (sum_sq / block.len() as f64).sqrt() as f32,
        peak_abs: peak,
    })
}

/// Linear magnitude to decibels with an epsilon guard.
#[inline]
pub fn to_db(value: f32) -> f32 {
    20.0 * (value + DB_EPSILON).log10()
}

/// Decibels back to linear magnitude.
#[inline]
pub fn from_db(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Averages interleaved frames down to mono.
///
/// Scratch space is allocated once; `process` splits larger inputs into
/// scratch-sized chunks so the audio callback never allocates.
pub struct Downmixer {
    channels: usize,
    scratch: Vec<f32>,
}

impl Downmixer {
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            channels: channels.max(1),
            scratch: vec![0.0; max_frames.max(1)],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Convert interleaved `f32` frames to mono and hand each chunk to `sink`.
    ///
    /// Trailing samples that do not form a full frame are ignored.
    pub fn process<F>(&mut self, interleaved: &[f32], sink: F)
    where
        F: FnMut(&[f32]),
    {
        self.process_with(interleaved, |s| s, sink);
    }

    /// Like [`Downmixer::process`] for any sample type, converting each
    /// sample with `convert`.
    pub fn process_with<T, C, F>(&mut self, interleaved: &[T], convert: C, mut sink: F)
    where
        T: Copy,
        C: Fn(T) -> f32,
        F: FnMut(&[f32]),
    {
        let channels = self.channels;
        let chunk_samples = self.scratch.len() * channels;
        for chunk in interleaved.chunks(chunk_samples) {
            let frames = chunk.len() / channels;
            if frames == 0 {
                continue;
            }
            for (out, frame) in self.scratch.iter_mut().zip(chunk.chunks_exact(channels)) {
                let sum: f32 = frame.iter().map(|&s| convert(s)).sum();
                *out = sum / channels as f32;
            }
            sink(&self.scratch[..frames]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_yields_none() {
        assert!(analyze(&[]).is_none());
    }

    #[test]
    fn constant_block_rms_matches_amplitude() {
        let metrics = analyze(&[0.5; 256]).unwrap();
        assert!((metrics.rms - 0.5).abs() < 1e-6);
        assert!((metrics.peak_abs - 0.5).abs() < 1e-6);
    }

    #[test]
    fn peak_uses_absolute_value() {
        let metrics = analyze(&[0.1, -0.9, 0.3]).unwrap();
        assert!((metrics.peak_abs - 0.9).abs() < 1e-6);
    }

    #[test]
    fn silence_db_is_finite() {
        let metrics = analyze(&[0.0; 64]).unwrap();
        let db = metrics.rms_db();
        assert!(db.is_finite());
        assert!((db - (-180.0)).abs() < 0.01);
        assert!(metrics.peak_db().is_finite());
    }

    #[test]
    fn full_scale_is_zero_db() {
        assert!(to_db(1.0).abs() < 1e-4);
        assert!((from_db(-20.0) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn downmix_averages_channels() {
        let mut mixer = Downmixer::new(2, 8);
        let interleaved = [1.0_f32, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mut out = Vec::new();
        mixer.process(&interleaved, |mono| out.extend_from_slice(mono));
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn downmix_splits_into_scratch_sized_chunks() {
        let mut mixer = Downmixer::new(1, 4);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut chunk_lengths = Vec::new();
        let mut out = Vec::new();
        mixer.process(&input, |mono| {
            chunk_lengths.push(mono.len());
            out.extend_from_slice(mono);
        });
        assert_eq!(chunk_lengths, vec![4, 4, 2]);
        assert_eq!(out, input);
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mut mixer = Downmixer::new(2, 4);
        let mut out = Vec::new();
        mixer.process_with(
            &[i16::MAX, i16::MAX, 0_i16, 0],
            |s| s as f32 / i16::MAX as f32,
            |mono| out.extend_from_slice(mono),
        );
        assert_eq!(out, vec![1.0, 0.0]);
    }

    #[test]
    fn downmix_drops_partial_frame() {
        let mut mixer = Downmixer::new(3, 16);
        let mut out = Vec::new();
        mixer.process(&[0.3_f32, 0.3, 0.3, 0.9], |mono| out.extend_from_slice(mono));
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
    }
}
