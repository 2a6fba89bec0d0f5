use crate::config::types::{Result, RunguardError};
use crate::core::cancel::CancelToken;
use log::{info, warn};
/// Shutdown signal handling for runguard
/// SIGINT, SIGTERM and SIGHUP are blocked in the supervisor and consumed by
/// a dedicated thread with sigwait, which turns them into a cancellation of
/// the running supervision. No code runs in signal-handler context.
use nix::sys::signal::{SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Signals that cancel a run
pub const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

fn shutdown_mask() -> SigSet {
    let mut mask = SigSet::empty();
    for signal in SHUTDOWN_SIGNALS {
        mask.add(signal);
    }
    mask
}

/// Bridge from shutdown signals to a `CancelToken`.
pub struct ShutdownSignals {
    received: Arc<AtomicI32>,
}

impl ShutdownSignals {
    /// Block the shutdown signals on the calling thread and start the waiter.
    ///
    /// Must be called from the main thread before any other thread is
    /// spawned, so that every thread inherits the blocked mask. Children
    /// spawned through `std::process::Command` get a clean mask back.
    pub fn install(cancel: CancelToken) -> Result<Self> {
        let mask = shutdown_mask();
        mask.thread_block()
            .map_err(|e| RunguardError::Signal(format!("failed to block shutdown signals: {}", e)))?;

        let received = Arc::new(AtomicI32::new(0));
        let slot = received.clone();
        std::thread::Builder::new()
            .name("runguard-signals".to_string())
            .spawn(move || loop {
                match mask.wait() {
                    Ok(signal) => {
                        info!("Received {}, cancelling run", signal);
                        slot.store(signal as i32, Ordering::SeqCst);
                        cancel.cancel();
                    }
                    Err(e) => {
                        warn!("sigwait failed, shutdown signals no longer handled: {}", e);
                        break;
                    }
                }
            })
            .map_err(|e| RunguardError::Signal(format!("failed to start signal thread: {}", e)))?;

        info!("Signal handling installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self { received })
    }

    /// Last shutdown signal received, if any
    pub fn received(&self) -> Option<Signal> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            raw => Signal::try_from(raw).ok(),
        }
    }
}
