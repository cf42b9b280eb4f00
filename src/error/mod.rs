// Error types for the stroke detector
//
// Audio-side failures carry numeric codes so hosts on the other side of an
// FFI boundary can branch on them without parsing messages.

mod audio;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
