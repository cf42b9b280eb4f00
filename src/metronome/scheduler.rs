//! Lookahead beat scheduler
//!
//! Pure timing logic with no clock or audio of its own. Each call to
//! [`LookaheadScheduler::tick_into`] commits every beat due before
//! `now + lookahead`, so how often it runs only affects the safety margin,
//! never when beats land.
//!
//! Beat times are `segment_start + k * interval`. A segment begins at the
//! first beat scheduled after a tempo or subdivision change, so repeated
//! additions never accumulate rounding drift.

use serde::{Deserialize, Serialize};

use crate::config::MetronomeConfig;

/// Delay between `start` and the first beat.
pub const LEAD_IN_SECONDS: f64 = 0.05;
/// How far ahead of the clock beats are committed.
pub const LOOKAHEAD_SECONDS: f64 = 0.1;

/// One committed click on the metronome's audio clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledBeat {
    pub scheduled_time_seconds: f64,
    pub is_accent: bool,
    pub beat_index: u64,
}

/// Seconds between consecutive clicks.
#[inline]
pub fn interval_seconds(config: &MetronomeConfig) -> f64 {
    60.0 / (config.tempo_bpm * config.subdivision as f64)
}

#[derive(Debug, Clone)]
pub struct LookaheadScheduler {
    config: MetronomeConfig,
    staged: Option<MetronomeConfig>,
    lookahead: f64,
    anchor_time: f64,
    segment_start: f64,
    segment_beats: u64,
    beat_count: u64,
}

impl LookaheadScheduler {
    pub fn new(config: MetronomeConfig) -> Self {
        Self::with_lookahead(config, LOOKAHEAD_SECONDS)
    }

    pub fn with_lookahead(config: MetronomeConfig, lookahead: f64) -> Self {
        Self {
            config: config.clamped(),
            staged: None,
            lookahead: lookahead.max(0.0),
            anchor_time: 0.0,
            segment_start: 0.0,
            segment_beats: 0,
            beat_count: 0,
        }
    }

    /// Anchor the first beat at `now + LEAD_IN_SECONDS` and reset the counter.
    pub fn start(&mut self, now: f64) {
        if let Some(staged) = self.staged.take() {
            self.config = staged;
        }
        self.anchor_time = now + LEAD_IN_SECONDS;
        self.segment_start = self.anchor_time;
        self.segment_beats = 0;
        self.beat_count = 0;
    }

    /// Queue a configuration for the next tick. Replaces any earlier one.
    pub fn stage(&mut self, config: MetronomeConfig) {
        self.staged = Some(config.clamped());
    }

    /// Commit every beat due before `now + lookahead`.
    pub fn tick_into<F>(&mut self, now: f64, emit: &mut F)
    where
        F: FnMut(ScheduledBeat),
    {
        self.apply_staged();

        let horizon = now + self.lookahead;
        loop {
            let at = self.next_beat_time();
            if at >= horizon {
                break;
            }
            let subdivision = self.config.subdivision.max(1) as u64;
            emit(ScheduledBeat {
                scheduled_time_seconds: at,
                is_accent: self.beat_count % subdivision == 0,
                beat_index: self.beat_count,
            });
            self.segment_beats += 1;
            self.beat_count += 1;
        }
    }

    pub fn tick(&mut self, now: f64) -> Vec<ScheduledBeat> {
        let mut beats = Vec::new();
        self.tick_into(now, &mut |beat| beats.push(beat));
        beats
    }

    fn apply_staged(&mut self) {
        let Some(staged) = self.staged.take() else {
            return;
        };
        let timing_changed = staged.tempo_bpm != self.config.tempo_bpm
            || staged.subdivision != self.config.subdivision;
        if timing_changed {
            // The next uncommitted beat keeps its time under the old interval.
            self.segment_start = self.next_beat_time();
            self.segment_beats = 0;
        }
        self.config = staged;
    }

    pub fn next_beat_time(&self) -> f64 {
        self.segment_start + self.segment_beats as f64 * interval_seconds(&self.config)
    }

    pub fn anchor_time(&self) -> f64 {
        self.anchor_time
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn config(&self) -> MetronomeConfig {
        self.config
    }

    pub fn interval_ms(&self) -> f64 {
        interval_seconds(&self.config) * 1000.0
    }
}
