//! Deterministic time source for engine tests.

use crate::core::cancel::CancelToken;
use crate::core::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock that only moves when slept on or advanced by hand.
///
/// Clones share the same timeline.
#[derive(Clone, Debug)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        self.advance(duration);
        cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_advances_shared_timeline() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        assert!(!clock.sleep(Duration::from_millis(20), &CancelToken::new()));
        assert_eq!(other.now() - start, Duration::from_millis(20));
    }

    #[test]
    fn test_cancelled_sleep_does_not_advance() {
        let clock = ManualClock::new();
        let token = CancelToken::new();
        token.cancel();
        assert!(clock.sleep(Duration::from_secs(1), &token));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
