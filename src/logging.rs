//! Tracing subscriber setup.
//!
//! Desktop builds log through the fmt subscriber filtered by `RUST_LOG` (or
//! the configured default level). Android routes the same events to logcat.
//! `log` records (ours in the JNI entry point, and those of dependencies) are
//! bridged into the subscriber by tracing-subscriber's log adapter.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::LoggingConfig;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    install(&config.level);
}

#[cfg(not(target_os = "android"))]
fn install(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Another subscriber may already be set by a host application or test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(target_os = "android")]
fn install(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("debug"));
    match tracing_android::layer("StrokeDetector") {
        Ok(layer) => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
        }
        Err(err) => eprintln!("[Logging] logcat layer unavailable: {}", err),
    }
}
