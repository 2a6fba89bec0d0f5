//! CPU load classification between two samples.

use crate::core::types::Sample;

/// Turns two successive samples into a load fraction and an idle verdict.
///
/// Stateless: the idle streak lives in the engine's `RunState`.
#[derive(Clone, Copy, Debug)]
pub struct LoadTracker {
    required_load: f64,
    core_count: usize,
}

impl LoadTracker {
    pub fn new(required_load: f64, core_count: usize) -> Self {
        Self {
            required_load,
            core_count: core_count.max(1),
        }
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// CPU time consumed per wall millisecond, clamped to [0, core_count].
    /// `None` when no wall time passed, since no load can be derived.
    pub fn observed_load(&self, previous: &Sample, current: &Sample, elapsed_ms: u64) -> Option<f64> {
        if elapsed_ms == 0 {
            return None;
        }
        let consumed = current.cpu_time_ms.saturating_sub(previous.cpu_time_ms) as f64;
        let load = consumed / elapsed_ms as f64;
        Some(load.clamp(0.0, self.core_count as f64))
    }

    /// Whether the tick between `previous` and `current` was idle.
    /// A zero-length tick is never idle.
    pub fn update(&self, previous: &Sample, current: &Sample, elapsed_ms: u64) -> bool {
        match self.observed_load(previous, current, elapsed_ms) {
            Some(load) => load < self.required_load,
            None => false,
        }
    }
}
