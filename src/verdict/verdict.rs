/// Verdict construction
/// The final outcome of a supervised run is a pure function of the engine's
/// terminal phase, its run state and the child's exit status.
use crate::core::types::{ChildExit, Phase, RunState};
use serde::Serialize;
use std::time::Instant;

/// Process exit codes reported for each outcome. Stable: automation keys on them.
pub mod exit_codes {
    pub const SUPERVISOR_ERROR: i32 = 1;
    pub const TIME_LIMIT_EXCEEDED: i32 = 2;
    pub const MEMORY_LIMIT_EXCEEDED: i32 = 3;
    pub const IDLE_LIMIT_EXCEEDED: i32 = 4;
    pub const CANCELLED: i32 = 5;
    pub const PROCESS_CREATION_DENIED: i32 = 6;
}

/// Terminal outcome of a run - closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Child exited on its own (any exit code)
    Completed,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    IdleLimitExceeded,
    /// Child tried to create a process (or thread) its policy forbids
    ProcessCreationDenied,
    /// Supervisor was asked to stop; the child was killed
    Cancelled,
    /// Supervisor could not launch, observe or kill the child
    SupervisorError,
}

impl Outcome {
    pub fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Completing => Outcome::Completed,
            Phase::TimedOut => Outcome::TimeLimitExceeded,
            Phase::MemoryExceeded => Outcome::MemoryLimitExceeded,
            Phase::IdleExceeded => Outcome::IdleLimitExceeded,
            Phase::ProcessCreationDenied => Outcome::ProcessCreationDenied,
            Phase::Cancelled => Outcome::Cancelled,
            Phase::Faulted | Phase::Launching | Phase::Running => Outcome::SupervisorError,
        }
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(
            self,
            Outcome::TimeLimitExceeded | Outcome::MemoryLimitExceeded | Outcome::IdleLimitExceeded
        )
    }

    /// Sentinel exit code; `None` for `Completed`, whose code is the child's.
    pub fn sentinel_exit_code(&self) -> Option<i32> {
        match self {
            Outcome::Completed => None,
            Outcome::TimeLimitExceeded => Some(exit_codes::TIME_LIMIT_EXCEEDED),
            Outcome::MemoryLimitExceeded => Some(exit_codes::MEMORY_LIMIT_EXCEEDED),
            Outcome::IdleLimitExceeded => Some(exit_codes::IDLE_LIMIT_EXCEEDED),
            Outcome::ProcessCreationDenied => Some(exit_codes::PROCESS_CREATION_DENIED),
            Outcome::Cancelled => Some(exit_codes::CANCELLED),
            Outcome::SupervisorError => Some(exit_codes::SUPERVISOR_ERROR),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::TimeLimitExceeded => "time_limit_exceeded",
            Outcome::MemoryLimitExceeded => "memory_limit_exceeded",
            Outcome::IdleLimitExceeded => "idle_limit_exceeded",
            Outcome::ProcessCreationDenied => "process_creation_denied",
            Outcome::Cancelled => "cancelled",
            Outcome::SupervisorError => "supervisor_error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single terminal record of a supervised run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verdict {
    pub outcome: Outcome,
    /// Child's own exit code; present only when `outcome` is `Completed`
    pub child_exit_code: Option<i32>,
    /// Signal that ended the child, when it died from one on its own
    pub term_signal: Option<i32>,
    pub wall_time_ms: u64,
    pub cpu_time_ms: u64,
    pub peak_memory_bytes: u64,
    /// Poll ticks executed
    pub ticks: u64,
    /// Human-oriented cause, e.g. the error behind a `SupervisorError`
    pub detail: Option<String>,
}

impl Verdict {
    /// Exit code the supervisor itself should return.
    pub fn exit_code(&self, propagate_child_code: bool) -> i32 {
        match self.outcome.sentinel_exit_code() {
            Some(code) => code,
            None if propagate_child_code => self.child_exit_code.unwrap_or(0),
            None => 0,
        }
    }
}

/// Verdict builder - pure function over the engine's final state
pub struct VerdictBuilder;

impl VerdictBuilder {
    /// Build the verdict for a run that reached `phase`.
    ///
    /// Never fails: inconsistent input (a `Completing` phase without an exit
    /// status) degrades to `SupervisorError` instead.
    pub fn finalize(
        state: &RunState,
        phase: Phase,
        exit: Option<ChildExit>,
        finished_at: Instant,
        detail: Option<String>,
    ) -> Verdict {
        let mut outcome = Outcome::from_phase(phase);
        let mut detail = detail;

        let (child_exit_code, term_signal) = match (outcome, exit) {
            (Outcome::Completed, Some(exit)) => (Some(exit.code()), exit.signal()),
            (Outcome::Completed, None) => {
                outcome = Outcome::SupervisorError;
                detail.get_or_insert_with(|| "child exit status unavailable".to_string());
                (None, None)
            }
            // the signal is the kernel's enforcement, not the child's code
            (Outcome::ProcessCreationDenied, exit) => (None, exit.and_then(|e| e.signal())),
            _ => (None, None),
        };

        if phase == Phase::Launching || phase == Phase::Running {
            detail.get_or_insert_with(|| format!("run ended in non-terminal phase {:?}", phase));
        }

        Verdict {
            outcome,
            child_exit_code,
            term_signal,
            wall_time_ms: finished_at
                .saturating_duration_since(state.start_time)
                .as_millis() as u64,
            cpu_time_ms: state.last_sample.cpu_time_ms,
            peak_memory_bytes: state.peak_memory_bytes,
            ticks: state.ticks,
            detail,
        }
    }

    /// Verdict for a child that never started.
    pub fn launch_failure(started_at: Instant, finished_at: Instant, detail: String) -> Verdict {
        let state = RunState::new(started_at);
        Self::finalize(&state, Phase::Faulted, None, finished_at, Some(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Sample, Usage};
    use std::time::Duration;

    fn create_test_state() -> (RunState, Instant) {
        let start = Instant::now();
        let mut state = RunState::new(start);
        state.ticks = 12;
        state.record(Sample::new(
            start + Duration::from_millis(240),
            Usage { cpu_time_ms: 180, working_set_bytes: 4096, peak_working_set_bytes: 8192 },
        ));
        (state, start)
    }

    #[test]
    fn test_finalize_completed() {
        let (state, start) = create_test_state();
        let verdict = VerdictBuilder::finalize(
            &state,
            Phase::Completing,
            Some(ChildExit::Exited(0)),
            start + Duration::from_millis(250),
            None,
        );

        assert_eq!(verdict.outcome, Outcome::Completed);
        assert_eq!(verdict.child_exit_code, Some(0));
        assert_eq!(verdict.wall_time_ms, 250);
        assert_eq!(verdict.cpu_time_ms, 180);
        assert_eq!(verdict.peak_memory_bytes, 8192);
        assert_eq!(verdict.ticks, 12);
    }

    #[test]
    fn test_finalize_limit_has_no_exit_code() {
        let (state, start) = create_test_state();
        for (phase, outcome) in [
            (Phase::TimedOut, Outcome::TimeLimitExceeded),
            (Phase::MemoryExceeded, Outcome::MemoryLimitExceeded),
            (Phase::IdleExceeded, Outcome::IdleLimitExceeded),
        ] {
            // a reaped status after our own kill is not the child's verdict
            let verdict = VerdictBuilder::finalize(
                &state,
                phase,
                Some(ChildExit::Signaled(9)),
                start + Duration::from_millis(300),
                None,
            );
            assert_eq!(verdict.outcome, outcome);
            assert!(verdict.outcome.is_limit_exceeded());
            assert_eq!(verdict.child_exit_code, None);
            assert_eq!(verdict.term_signal, None);
        }
    }

    #[test]
    fn test_finalize_signaled_child_completes_with_shell_code() {
        let (state, start) = create_test_state();
        let verdict = VerdictBuilder::finalize(
            &state,
            Phase::Completing,
            Some(ChildExit::Signaled(11)),
            start,
            None,
        );
        assert_eq!(verdict.outcome, Outcome::Completed);
        assert_eq!(verdict.child_exit_code, Some(139));
        assert_eq!(verdict.term_signal, Some(11));
    }

    #[test]
    fn test_completing_without_status_degrades_to_supervisor_error() {
        let (state, start) = create_test_state();
        let verdict = VerdictBuilder::finalize(&state, Phase::Completing, None, start, None);
        assert_eq!(verdict.outcome, Outcome::SupervisorError);
        assert!(verdict.detail.is_some());
    }

    #[test]
    fn test_launch_failure() {
        let start = Instant::now();
        let verdict = VerdictBuilder::launch_failure(start, start, "spawn failed".to_string());
        assert_eq!(verdict.outcome, Outcome::SupervisorError);
        assert_eq!(verdict.wall_time_ms, 0);
        assert_eq!(verdict.cpu_time_ms, 0);
        assert_eq!(verdict.detail.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let (state, start) = create_test_state();
        let mut codes = Vec::new();
        for phase in [
            Phase::TimedOut,
            Phase::MemoryExceeded,
            Phase::IdleExceeded,
            Phase::ProcessCreationDenied,
            Phase::Cancelled,
            Phase::Faulted,
        ] {
            let verdict = VerdictBuilder::finalize(&state, phase, None, start, None);
            codes.push(verdict.exit_code(true));
        }
        let mut unique = codes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_process_creation_denied_keeps_signal_only() {
        let (state, start) = create_test_state();
        let verdict = VerdictBuilder::finalize(
            &state,
            Phase::ProcessCreationDenied,
            Some(ChildExit::Signaled(31)),
            start + Duration::from_millis(40),
            None,
        );
        assert_eq!(verdict.outcome, Outcome::ProcessCreationDenied);
        assert_eq!(verdict.child_exit_code, None);
        assert_eq!(verdict.term_signal, Some(31));
        assert_eq!(verdict.exit_code(true), exit_codes::PROCESS_CREATION_DENIED);
        assert!(!verdict.outcome.is_limit_exceeded());
    }

    #[test]
    fn test_exit_code_propagation() {
        let (state, start) = create_test_state();
        let verdict = VerdictBuilder::finalize(
            &state,
            Phase::Completing,
            Some(ChildExit::Exited(42)),
            start,
            None,
        );
        assert_eq!(verdict.exit_code(true), 42);
        assert_eq!(verdict.exit_code(false), 0);
    }
}
