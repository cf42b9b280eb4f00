// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Error code range: 1001-1013
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Tempo is not a finite value greater than zero
    pub const TEMPO_INVALID: i32 = 1001;

    /// Component is already running
    pub const ALREADY_RUNNING: i32 = 1002;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1003;

    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1004;

    /// No capture device present
    pub const NO_INPUT_DEVICE: i32 = 1005;

    /// No playback device present
    pub const NO_OUTPUT_DEVICE: i32 = 1006;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1007;

    /// Device only offers a sample format we cannot read
    pub const UNSUPPORTED_FORMAT: i32 = 1008;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1009;

    /// Worker or stream host thread could not be spawned
    pub const THREAD_SPAWN_FAILED: i32 = 1010;

    /// Audio stream disconnected or channel closed unexpectedly
    pub const STREAM_FAILURE: i32 = 1011;

    /// JNI initialization failed on Android
    pub const JNI_INIT_FAILED: i32 = 1012;

    /// Android context was not initialized before a stream was opened
    pub const CONTEXT_NOT_INITIALIZED: i32 = 1013;
}

/// Log an audio error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These cover capture negotiation, stream management, hardware access and
/// the metronome clock.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Tempo must be finite and greater than zero
    TempoInvalid { bpm: f64 },

    /// Component is already running
    AlreadyRunning,

    /// Hardware error occurred
    HardwareError { details: String },

    /// Microphone permission denied
    PermissionDenied,

    /// No capture device present
    NoInputDevice,

    /// No playback device present
    NoOutputDevice,

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Device only offers a sample format we cannot read
    UnsupportedFormat { format: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Worker or stream host thread could not be spawned
    ThreadSpawnFailed { reason: String },

    /// Stream channel disconnected unexpectedly
    StreamFailure { reason: String },

    /// JNI initialization failed on Android
    JniInitFailed { reason: String },

    /// Android context was not initialized before a stream was opened
    ContextNotInitialized,
}

impl AudioError {
    /// True for failures that leave the detection engine in its error state
    /// rather than bubbling up as a transient stream problem.
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            AudioError::PermissionDenied | AudioError::NoInputDevice
        )
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::TempoInvalid { .. } => AudioErrorCodes::TEMPO_INVALID,
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::NoInputDevice => AudioErrorCodes::NO_INPUT_DEVICE,
            AudioError::NoOutputDevice => AudioErrorCodes::NO_OUTPUT_DEVICE,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::UnsupportedFormat { .. } => AudioErrorCodes::UNSUPPORTED_FORMAT,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::ThreadSpawnFailed { .. } => AudioErrorCodes::THREAD_SPAWN_FAILED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::JniInitFailed { .. } => AudioErrorCodes::JNI_INIT_FAILED,
            AudioError::ContextNotInitialized => AudioErrorCodes::CONTEXT_NOT_INITIALIZED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::TempoInvalid { bpm } => {
                format!("Tempo must be greater than 0 BPM (got {})", bpm)
            }
            AudioError::AlreadyRunning => "Already running. Call stop() first.".to_string(),
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::NoInputDevice => "No audio input device available".to_string(),
            AudioError::NoOutputDevice => "No audio output device available".to_string(),
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::UnsupportedFormat { format } => {
                format!("Unsupported sample format: {}", format)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::ThreadSpawnFailed { reason } => {
                format!("Failed to spawn thread: {}", reason)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::JniInitFailed { reason } => {
                format!("JNI initialization failed: {}", reason)
            }
            AudioError::ContextNotInitialized => {
                "Android context not initialized. JNI_OnLoad has not run.".to_string()
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::ThreadSpawnFailed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::TempoInvalid { bpm: 0.0 }.code(),
            AudioErrorCodes::TEMPO_INVALID
        );
        assert_eq!(
            AudioError::AlreadyRunning.code(),
            AudioErrorCodes::ALREADY_RUNNING
        );
        assert_eq!(
            AudioError::PermissionDenied.code(),
            AudioErrorCodes::PERMISSION_DENIED
        );
        assert_eq!(
            AudioError::NoInputDevice.code(),
            AudioErrorCodes::NO_INPUT_DEVICE
        );
        assert_eq!(
            AudioError::StreamOpenFailed {
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::STREAM_OPEN_FAILED
        );
        assert_eq!(
            AudioError::ContextNotInitialized.code(),
            AudioErrorCodes::CONTEXT_NOT_INITIALIZED
        );
    }

    #[test]
    fn test_codes_are_unique() {
        let all = [
            AudioError::TempoInvalid { bpm: 0.0 },
            AudioError::AlreadyRunning,
            AudioError::HardwareError {
                details: String::new(),
            },
            AudioError::PermissionDenied,
            AudioError::NoInputDevice,
            AudioError::NoOutputDevice,
            AudioError::StreamOpenFailed {
                reason: String::new(),
            },
            AudioError::UnsupportedFormat {
                format: String::new(),
            },
            AudioError::LockPoisoned {
                component: String::new(),
            },
            AudioError::ThreadSpawnFailed {
                reason: String::new(),
            },
            AudioError::StreamFailure {
                reason: String::new(),
            },
            AudioError::JniInitFailed {
                reason: String::new(),
            },
            AudioError::ContextNotInitialized,
        ];
        let mut codes: Vec<i32> = all.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(codes.first(), Some(&1001));
        assert_eq!(codes.last(), Some(&1013));
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::TempoInvalid { bpm: -3.0 };
        assert_eq!(err.message(), "Tempo must be greater than 0 BPM (got -3)");

        let err = AudioError::PermissionDenied;
        assert!(err.message().contains("permission denied"));

        let err = AudioError::NoInputDevice;
        assert!(err.message().contains("input device"));
    }

    #[test]
    fn test_access_failures() {
        assert!(AudioError::PermissionDenied.is_access_failure());
        assert!(AudioError::NoInputDevice.is_access_failure());
        assert!(!AudioError::StreamOpenFailed {
            reason: "busy".into()
        }
        .is_access_failure());
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NoOutputDevice;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("no threads left");
        let audio_err: AudioError = io_err.into();
        match audio_err {
            AudioError::ThreadSpawnFailed { reason } => {
                assert!(reason.contains("no threads left"));
            }
            _ => panic!("Expected ThreadSpawnFailed"),
        }
    }
}
