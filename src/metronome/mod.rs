// Metronome module - independently clocked lookahead click scheduler
//
// The metronome never shares a clock with detection. A host drives `tick()`
// from its frame loop (or a `MetronomeDriver` thread does it); every tick
// commits the beats falling inside the lookahead window to the clock, which
// renders them on exact frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::MetronomeConfig;
use crate::error::{log_audio_error, AudioError};
use crate::telemetry::{self, LifecyclePhase};

pub mod click;
pub mod clock;
pub mod output;
pub mod scheduler;

pub use clock::{ClockFactory, ManualClock, MetronomeClock, RecordedClick};
pub use output::{OutputClock, OutputClockFactory};
pub use scheduler::{LookaheadScheduler, ScheduledBeat, LEAD_IN_SECONDS, LOOKAHEAD_SECONDS};

/// Default re-entry period for [`MetronomeDriver`], roughly one display frame.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(16);

fn validate_tempo(bpm: f64) -> Result<f64, AudioError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(AudioError::TempoInvalid { bpm })
    }
}

pub struct Metronome {
    factory: Arc<dyn ClockFactory>,
    requested: MetronomeConfig,
    scheduler: LookaheadScheduler,
    clock: Option<Box<dyn MetronomeClock>>,
}

impl Metronome {
    pub fn new(factory: Arc<dyn ClockFactory>, config: MetronomeConfig) -> Result<Self, AudioError> {
        validate_tempo(config.tempo_bpm)?;
        let requested = config.clamped();
        Ok(Self {
            factory,
            requested,
            scheduler: LookaheadScheduler::new(requested),
            clock: None,
        })
    }

    /// Open a fresh clock and anchor the first beat just after its current time.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.clock.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        let clock = self.factory.open().map_err(|err| {
            log_audio_error(&err, "Metronome::start");
            telemetry::hub().record_audio_error(&err, "metronome start");
            err
        })?;

        self.scheduler.stage(self.requested);
        self.scheduler.start(clock.now_seconds());
        self.clock = Some(clock);

        tracing::info!(
            "[Metronome] Started at {} BPM x{}, first beat at {:.3}s",
            self.requested.tempo_bpm,
            self.requested.subdivision,
            self.scheduler.anchor_time()
        );
        telemetry::hub().record_phase(LifecyclePhase::MetronomeStarted);
        Ok(())
    }

    /// Close the clock. Safe to call when already stopped.
    pub fn stop(&mut self) {
        let Some(mut clock) = self.clock.take() else {
            return;
        };
        if let Err(err) = clock.close() {
            log_audio_error(&err, "Metronome::stop");
        }
        tracing::info!(
            "[Metronome] Stopped after {} beats",
            self.scheduler.beat_count()
        );
        telemetry::hub().record_phase(LifecyclePhase::MetronomeStopped);
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_some()
    }

    /// Commit every beat due within the lookahead window.
    pub fn tick(&mut self) -> Vec<ScheduledBeat> {
        let mut beats = Vec::new();
        let Some(clock) = self.clock.as_mut() else {
            return beats;
        };
        let now = clock.now_seconds();
        // Staged changes are applied at the start of the tick, so this is the
        // volume of every beat it commits.
        let volume = self.requested.volume;
        self.scheduler.tick_into(now, &mut |beat| {
            clock.schedule(&beat, volume);
            beats.push(beat);
        });
        beats
    }

    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), AudioError> {
        self.requested.tempo_bpm = validate_tempo(bpm)?;
        self.scheduler.stage(self.requested);
        Ok(())
    }

    pub fn set_subdivision(&mut self, subdivision: u32) {
        self.requested.subdivision = subdivision;
        self.requested = self.requested.clamped();
        self.scheduler.stage(self.requested);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.requested.volume = volume;
        self.requested = self.requested.clamped();
        self.scheduler.stage(self.requested);
    }

    pub fn config(&self) -> MetronomeConfig {
        self.requested
    }

    /// Time of the first beat of the current run on the metronome clock.
    pub fn anchor_time(&self) -> Option<f64> {
        self.clock.as_ref().map(|_| self.scheduler.anchor_time())
    }

    /// Milliseconds between clicks under the configuration in effect.
    pub fn interval_ms(&self) -> f64 {
        self.scheduler.interval_ms()
    }

    pub fn now_seconds(&self) -> Option<f64> {
        self.clock.as_ref().map(|clock| clock.now_seconds())
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background thread that calls [`Metronome::tick`] at a fixed period, for
/// hosts without a render loop.
pub struct MetronomeDriver {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MetronomeDriver {
    pub fn spawn(metronome: Arc<Mutex<Metronome>>, period: Duration) -> Result<Self, AudioError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("metronome-tick".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    match metronome.lock() {
                        Ok(mut guard) => {
                            guard.tick();
                        }
                        Err(_) => {
                            log_audio_error(
                                &AudioError::LockPoisoned {
                                    component: "metronome".to_string(),
                                },
                                "MetronomeDriver",
                            );
                            break;
                        }
                    }
                    thread::sleep(period);
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) -> Result<(), AudioError> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| AudioError::StreamFailure {
                reason: "metronome driver panicked".to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for MetronomeDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
