//! Latest-value-wins handoff of [`DetectorConfig`] to the detection thread.
//!
//! The control side overwrites a single slot; the reader picks up whatever
//! was written last, so a burst of updates can never push out the final one.
//! Fields are stored as `f32` bits in atomics and guarded by a sequence
//! counter (odd while a write is in progress). A reader that races a write
//! sees a mismatched sequence and simply retries on its next block.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::DetectorConfig;

const FIELDS: usize = 6;

struct Shared {
    sequence: AtomicU64,
    words: [AtomicU32; FIELDS],
}

fn to_words(config: &DetectorConfig) -> [u32; FIELDS] {
    [
        config.sensitivity.to_bits(),
        config.debounce_ms.to_bits(),
        config.min_db.to_bits(),
        config.alpha.to_bits(),
        config.measure_window_ms.to_bits(),
        config.telemetry_probability.to_bits(),
    ]
}

fn from_words(words: [u32; FIELDS]) -> DetectorConfig {
    DetectorConfig {
        sensitivity: f32::from_bits(words[0]),
        debounce_ms: f32::from_bits(words[1]),
        min_db: f32::from_bits(words[2]),
        alpha: f32::from_bits(words[3]),
        measure_window_ms: f32::from_bits(words[4]),
        telemetry_probability: f32::from_bits(words[5]),
    }
}

/// Create a slot holding `initial`. The reader treats `initial` as already
/// applied.
pub fn config_slot(initial: DetectorConfig) -> (ConfigWriter, ConfigReader) {
    let words = to_words(&initial);
    let shared = Arc::new(Shared {
        sequence: AtomicU64::new(0),
        words: words.map(AtomicU32::new),
    });
    (
        ConfigWriter {
            shared: Arc::clone(&shared),
        },
        ConfigReader {
            shared,
            applied: 0,
        },
    )
}

/// Control-side half. Single writer.
pub struct ConfigWriter {
    shared: Arc<Shared>,
}

impl ConfigWriter {
    pub fn write(&mut self, config: DetectorConfig) {
        let shared = &self.shared;
        shared.sequence.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        for (slot, word) in shared.words.iter().zip(to_words(&config)) {
            slot.store(word, Ordering::Relaxed);
        }
        shared.sequence.fetch_add(1, Ordering::Release);
    }
}

/// Detection-side half. Never blocks or allocates.
pub struct ConfigReader {
    shared: Arc<Shared>,
    applied: u64,
}

impl ConfigReader {
    /// The newest config not yet taken, if a complete one is available.
    pub fn take_latest(&mut self) -> Option<DetectorConfig> {
        let shared = &self.shared;
        let before = shared.sequence.load(Ordering::Acquire);
        if before == self.applied || before % 2 == 1 {
            return None;
        }
        let mut words = [0u32; FIELDS];
        for (word, slot) in words.iter_mut().zip(shared.words.iter()) {
            *word = slot.load(Ordering::Relaxed);
        }
        fence(Ordering::Acquire);
        if shared.sequence.load(Ordering::Relaxed) != before {
            return None;
        }
        self.applied = before;
        Some(from_words(words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_sensitivity(sensitivity: f32) -> DetectorConfig {
        DetectorConfig {
            sensitivity,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn initial_value_is_not_reported() {
        let (_writer, mut reader) = config_slot(DetectorConfig::default());
        assert_eq!(reader.take_latest(), None);
    }

    #[test]
    fn burst_of_writes_yields_only_the_last() {
        let (mut writer, mut reader) = config_slot(DetectorConfig::default());
        for _ in 0..1_000 {
            writer.write(with_sensitivity(30.0));
        }
        writer.write(with_sensitivity(1.0));
        assert_eq!(reader.take_latest(), Some(with_sensitivity(1.0)));
        assert_eq!(reader.take_latest(), None);
    }

    #[test]
    fn every_field_survives_the_handoff() {
        let (mut writer, mut reader) = config_slot(DetectorConfig::default());
        let config = DetectorConfig {
            sensitivity: 3.5,
            debounce_ms: 12.0,
            min_db: -61.25,
            alpha: 0.125,
            measure_window_ms: 20.0,
            telemetry_probability: 0.5,
        };
        writer.write(config);
        assert_eq!(reader.take_latest(), Some(config));
    }

    #[test]
    fn concurrent_reader_converges_on_final_value() {
        let (mut writer, mut reader) = config_slot(DetectorConfig::default());
        let handle = std::thread::spawn(move || {
            let mut last = None;
            for _ in 0..200_000 {
                if let Some(config) = reader.take_latest() {
                    // Never a torn mix of two writes.
                    assert_eq!(config.debounce_ms, config.sensitivity * 10.0);
                    last = Some(config);
                }
            }
            (reader, last)
        });
        for i in 1..=500 {
            let sensitivity = i as f32;
            writer.write(DetectorConfig {
                sensitivity,
                debounce_ms: sensitivity * 10.0,
                ..DetectorConfig::default()
            });
        }
        let (mut reader, last) = handle.join().expect("reader thread");
        let newest = reader.take_latest().or(last).map(|c| c.sensitivity);
        assert_eq!(newest, Some(500.0));
    }
}
