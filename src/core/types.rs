use crate::config::types::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Raw resource readings for a live process, as returned by a sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    /// Cumulative user+system CPU time
    pub cpu_time_ms: u64,
    /// Resident working set right now
    pub working_set_bytes: u64,
    /// Highest working set the kernel has seen for this process (0 if unknown)
    pub peak_working_set_bytes: u64,
}

/// One poll-tick reading, stamped by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: Instant,
    pub cpu_time_ms: u64,
    pub working_set_bytes: u64,
    pub peak_working_set_bytes: u64,
}

impl Sample {
    pub fn new(timestamp: Instant, usage: Usage) -> Self {
        Self {
            timestamp,
            cpu_time_ms: usage.cpu_time_ms,
            working_set_bytes: usage.working_set_bytes,
            peak_working_set_bytes: usage.peak_working_set_bytes,
        }
    }

    /// Zero-usage reading at launch time; the first tick measures against it.
    pub fn baseline(timestamp: Instant) -> Self {
        Self::new(timestamp, Usage::default())
    }

    /// Milliseconds between an earlier sample and this one.
    pub fn elapsed_since(&self, earlier: &Sample) -> u64 {
        self.timestamp
            .saturating_duration_since(earlier.timestamp)
            .as_millis() as u64
    }
}

/// How the child ended, as reported by the OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
}

impl ChildExit {
    /// Shell-style code: the exit status, or 128 + signal number.
    pub fn code(&self) -> i32 {
        match self {
            ChildExit::Exited(code) => *code,
            ChildExit::Signaled(signal) => 128 + signal,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ChildExit::Exited(_) => None,
            ChildExit::Signaled(signal) => Some(*signal),
        }
    }
}

impl From<std::process::ExitStatus> for ChildExit {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match (status.code(), status.signal()) {
            (Some(code), _) => ChildExit::Exited(code),
            (None, Some(signal)) => ChildExit::Signaled(signal),
            // stopped/continued statuses are never returned by wait() on an exited child
            (None, None) => ChildExit::Exited(-1),
        }
    }
}

/// Enforcement engine lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Launching,
    Running,
    Completing,
    TimedOut,
    MemoryExceeded,
    IdleExceeded,
    /// The kernel killed the child for creating a process or thread
    ProcessCreationDenied,
    Cancelled,
    Faulted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Launching | Phase::Running)
    }

    /// Phases in which the engine must kill the child itself.
    pub fn requires_termination(&self) -> bool {
        matches!(
            self,
            Phase::TimedOut | Phase::MemoryExceeded | Phase::IdleExceeded | Phase::Cancelled
        )
    }
}

/// Mutable per-run bookkeeping, touched only by the engine loop.
#[derive(Clone, Debug)]
pub struct RunState {
    pub start_time: Instant,
    pub last_sample: Sample,
    pub cumulative_idle_ms: u64,
    pub peak_memory_bytes: u64,
    pub ticks: u64,
    pub phase: Phase,
}

impl RunState {
    pub fn new(start_time: Instant) -> Self {
        Self {
            start_time,
            last_sample: Sample::baseline(start_time),
            cumulative_idle_ms: 0,
            peak_memory_bytes: 0,
            ticks: 0,
            phase: Phase::Launching,
        }
    }

    /// Accept a new sample as the latest reading.
    pub fn record(&mut self, sample: Sample) {
        self.peak_memory_bytes = self
            .peak_memory_bytes
            .max(sample.working_set_bytes)
            .max(sample.peak_working_set_bytes);
        self.last_sample = sample;
    }
}

/// Outcome of a termination request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KillReport {
    /// A kill signal was actually delivered
    pub kill_sent: bool,
    /// The process had already exited when the request arrived
    pub already_exited: bool,
    /// Exit status collected while reaping, if any
    pub exit: Option<ChildExit>,
    pub notes: Vec<String>,
}

impl KillReport {
    pub fn already_exited(exit: Option<ChildExit>) -> Self {
        Self {
            kill_sent: false,
            already_exited: true,
            exit,
            notes: Vec::new(),
        }
    }
}

/// Capability over one supervised child process.
///
/// The engine only ever talks to the child through this trait, which keeps
/// it independent of how the process was created and lets tests drive it
/// with a scripted fake.
pub trait SupervisedProcess {
    /// OS process id, for logging.
    fn pid(&self) -> u32;

    /// Non-blocking exit check. `Ok(None)` while the process is alive.
    fn poll_exit(&mut self) -> Result<Option<ChildExit>>;

    /// Read current usage. Must not disturb the child. Fails with
    /// `RunguardError::ProcessUnavailable` when the process cannot be read.
    fn sample(&mut self) -> Result<Usage>;

    /// Kill the process. Idempotent: a process that already exited is a
    /// success, reported through `KillReport::already_exited`.
    fn terminate(&mut self) -> Result<KillReport>;

    fn is_alive(&mut self) -> bool {
        matches!(self.poll_exit(), Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_child_exit_code_mapping() {
        assert_eq!(ChildExit::Exited(0).code(), 0);
        assert_eq!(ChildExit::Exited(7).code(), 7);
        assert_eq!(ChildExit::Signaled(9).code(), 137);
        assert_eq!(ChildExit::Signaled(15).signal(), Some(15));
        assert_eq!(ChildExit::Exited(1).signal(), None);
    }

    #[test]
    fn test_run_state_tracks_peak_memory() {
        let start = Instant::now();
        let mut state = RunState::new(start);
        state.record(Sample::new(
            start + Duration::from_millis(10),
            Usage { cpu_time_ms: 1, working_set_bytes: 500, peak_working_set_bytes: 0 },
        ));
        state.record(Sample::new(
            start + Duration::from_millis(20),
            Usage { cpu_time_ms: 2, working_set_bytes: 300, peak_working_set_bytes: 800 },
        ));
        state.record(Sample::new(
            start + Duration::from_millis(30),
            Usage { cpu_time_ms: 3, working_set_bytes: 100, peak_working_set_bytes: 0 },
        ));
        assert_eq!(state.peak_memory_bytes, 800);
        assert_eq!(state.last_sample.cpu_time_ms, 3);
    }

    #[test]
    fn test_phase_classification() {
        assert!(!Phase::Running.is_terminal());
        assert!(Phase::Completing.is_terminal());
        assert!(Phase::Cancelled.requires_termination());
        assert!(!Phase::Completing.requires_termination());
        assert!(!Phase::Faulted.requires_termination());
        assert!(Phase::ProcessCreationDenied.is_terminal());
        assert!(!Phase::ProcessCreationDenied.requires_termination());
    }
}
