//! Metronome clocks
//!
//! Each metronome owns its clock outright. Nothing here is shared with the
//! detection engine, so either side can fail or restart alone.

use std::sync::{Arc, Mutex};

use super::click::ClickEnvelope;
use super::scheduler::ScheduledBeat;
use crate::error::AudioError;

/// An audio clock that can realize committed beats.
pub trait MetronomeClock: Send {
    /// Current position of the clock in seconds.
    fn now_seconds(&self) -> f64;

    /// Commit one click at `beat.scheduled_time_seconds`. Never blocks.
    fn schedule(&mut self, beat: &ScheduledBeat, volume: f32);

    /// Stop producing audio. Idempotent.
    fn close(&mut self) -> Result<(), AudioError>;
}

/// Opens a fresh clock for every `Metronome::start`.
pub trait ClockFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn MetronomeClock>, AudioError>;
}

/// One committed click as seen by a [`ManualClock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedClick {
    pub beat: ScheduledBeat,
    pub envelope: ClickEnvelope,
}

#[derive(Debug, Default)]
struct ManualState {
    now: f64,
    clicks: Vec<RecordedClick>,
    opened: u32,
    closed: u32,
}

/// Hand-advanced clock that records every committed click.
///
/// Clones share state, so a test can keep one handle and give the factory to
/// the metronome.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.now += seconds.max(0.0);
        }
    }

    pub fn set_now(&self, seconds: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.now = seconds;
        }
    }

    pub fn clicks(&self) -> Vec<RecordedClick> {
        self.state
            .lock()
            .map(|state| state.clicks.clone())
            .unwrap_or_default()
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().map(|state| state.opened).unwrap_or(0)
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().map(|state| state.closed).unwrap_or(0)
    }
}

impl MetronomeClock for ManualClock {
    fn now_seconds(&self) -> f64 {
        self.state.lock().map(|state| state.now).unwrap_or(0.0)
    }

    fn schedule(&mut self, beat: &ScheduledBeat, volume: f32) {
        if let Ok(mut state) = self.state.lock() {
            state.clicks.push(RecordedClick {
                beat: *beat,
                envelope: ClickEnvelope::new(volume, beat.is_accent),
            });
        }
    }

    fn close(&mut self) -> Result<(), AudioError> {
        let mut state = self.state.lock().map_err(|_| AudioError::LockPoisoned {
            component: "manual clock".to_string(),
        })?;
        state.closed += 1;
        Ok(())
    }
}

impl ClockFactory for ManualClock {
    fn open(&self) -> Result<Box<dyn MetronomeClock>, AudioError> {
        let mut state = self.state.lock().map_err(|_| AudioError::LockPoisoned {
            component: "manual clock".to_string(),
        })?;
        state.opened += 1;
        Ok(Box::new(self.clone()))
    }
}

/// Render recorded clicks to a mono buffer, for offline export.
pub fn render_offline(clicks: &[RecordedClick], sample_rate: u32, total_frames: usize) -> Vec<f32> {
    let sr = sample_rate.max(1) as f64;
    let mut out = vec![0.0f32; total_frames];
    for click in clicks {
        let start = (click.beat.scheduled_time_seconds * sr).round().max(0.0) as usize;
        let length = (click.envelope.duration_seconds() * sr).ceil() as usize;
        let end = start.saturating_add(length).min(total_frames);
        for frame in start..end {
            let t = (frame - start) as f64 / sr;
            out[frame] += click.envelope.sample_at(t);
        }
    }
    for sample in out.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
    out
}
