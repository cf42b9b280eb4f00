// Stroke Detector Core - real-time percussion onset detection
// Adaptive-threshold stroke detection over two execution paths plus an
// independently clocked lookahead metronome

pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod logging;
pub mod metronome;
pub mod telemetry;

pub use analysis::{DetectionEvent, RunId, StrokeEvent, StrokeMeasurement, TelemetrySample};
pub use config::{AppConfig, DetectorConfig, DetectorConfigPatch, MetronomeConfig};
pub use engine::{DetectionEngine, EngineStatus, PathKind};
pub use error::{AudioError, ErrorCode};
pub use metronome::{Metronome, ScheduledBeat};

use std::sync::atomic::{AtomicBool, Ordering};

static ANDROID_CONTEXT_READY: AtomicBool = AtomicBool::new(false);

/// Whether the Android audio context has been initialized by `JNI_OnLoad`.
/// Always true off Android.
pub fn android_context_ready() -> bool {
    cfg!(not(target_os = "android")) || ANDROID_CONTEXT_READY.load(Ordering::Acquire)
}

/// JNI_OnLoad is called when the native library is loaded by Android.
/// Initializes logging and the context Oboe needs to reach the audio service.
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "system" fn JNI_OnLoad(vm: jni::JavaVM, _reserved: *mut std::ffi::c_void) -> jni::sys::jint {
    logging::init(&config::LoggingConfig::default());
    telemetry::hub().record_phase(telemetry::LifecyclePhase::LibraryLoaded);
    log::info!("JNI_OnLoad called - initializing Android context");

    let raw = vm.get_java_vm_pointer();
    if raw.is_null() {
        let err = AudioError::JniInitFailed {
            reason: "null JavaVM pointer".to_string(),
        };
        error::log_audio_error(&err, "JNI_OnLoad");
        telemetry::hub().record_audio_error(&err, "JNI_OnLoad");
    } else {
        // SAFETY: the VM pointer stays valid for the life of the process and
        // this runs once, before any Oboe stream is opened. No activity
        // context is available at load time.
        unsafe {
            ndk_context::initialize_android_context(raw.cast(), std::ptr::null_mut());
        }
        ANDROID_CONTEXT_READY.store(true, Ordering::Release);
        telemetry::hub().record_phase(telemetry::LifecyclePhase::ContextInitialized);
        log::info!("Android context initialized successfully");
    }

    jni::sys::JNI_VERSION_1_6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "android"))]
    #[test]
    fn desktop_context_is_always_ready() {
        assert!(android_context_ready());
    }
}
