use crate::core::cancel::CancelToken;
use std::time::{Duration, Instant};

/// Time source for the enforcement loop.
///
/// `sleep` is the loop's only suspension point and must return early when
/// the token is cancelled.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Sleep for `duration`; returns true if cancelled meanwhile.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Wall clock backed by `Instant` and a cancellable channel wait.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        cancel.wait_timeout(duration)
    }
}
