//! Dedicated threads for platform stream handles.
//!
//! Platform streams (cpal in particular) are not `Send`, so each one lives on
//! a thread that builds it, reports the outcome, and drops it when told to
//! stop. The handle returned here is `Send` and can sit inside the engine.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::AudioError;

/// A stream kept alive on its own thread until [`HostedStream::close`].
pub struct HostedStream {
    label: &'static str,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HostedStream {
    /// Build a stream on a new thread and wait for it to report.
    ///
    /// `build` runs on the host thread; its `Ok` value is kept alive there
    /// until the handle is closed or dropped.
    pub fn spawn<F, S>(label: &'static str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<S, AudioError> + Send + 'static,
        S: 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Returns on an explicit stop or when the handle is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("[{}] stream released", label);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                label,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamFailure {
                    reason: format!("{} exited before reporting", label),
                })
            }
        }
    }

    /// Stop and join the host thread. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), AudioError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| AudioError::StreamFailure {
                reason: format!("{} panicked while closing", self.label),
            }),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for HostedStream {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!("[{}] close on drop failed: {}", self.label, err);
        }
    }
}
