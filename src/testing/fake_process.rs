//! Scripted stand-in for a supervised child.

use crate::config::types::{Result, RunguardError, Unavailable};
use crate::core::cancel::CancelToken;
use crate::core::types::{ChildExit, KillReport, SupervisedProcess, Usage};

const FAKE_PID: u32 = 4242;

/// One scripted tick of a fake process
#[derive(Clone, Debug, PartialEq)]
pub enum FakeStep {
    /// Alive, reporting this cumulative usage
    Usage { cpu_ms: u64, working_set: u64 },
    /// Exited before this tick's exit check
    Exit(ChildExit),
    /// Still running at the exit check, gone by the time it is sampled
    VanishedThenExited(ChildExit),
    /// Alive but its usage cannot be read
    Unreadable(String),
}

impl FakeStep {
    pub fn usage(cpu_ms: u64, working_set: u64) -> Self {
        FakeStep::Usage { cpu_ms, working_set }
    }
}

/// `SupervisedProcess` driven by a list of steps.
///
/// Each sample consumes one step; the last step repeats forever.
#[derive(Debug)]
pub struct FakeProcess {
    steps: Vec<FakeStep>,
    cursor: usize,
    exited: Option<ChildExit>,
    vanish_seen: bool,
    exit_before_kill: Option<ChildExit>,
    fail_terminate: bool,
    cancel_at: Option<(u64, CancelToken)>,
    samples_taken: u64,
    terminate_calls: u32,
    killed: bool,
}

impl FakeProcess {
    pub fn new(steps: Vec<FakeStep>) -> Self {
        Self {
            steps,
            cursor: 0,
            exited: None,
            vanish_seen: false,
            exit_before_kill: None,
            fail_terminate: false,
            cancel_at: None,
            samples_taken: 0,
            terminate_calls: 0,
            killed: false,
        }
    }

    /// Live process with the given cumulative CPU readings and a flat working set.
    pub fn from_cpu_series(cpu_ms: &[u64], working_set: u64) -> Self {
        Self::new(
            cpu_ms
                .iter()
                .map(|&cpu| FakeStep::usage(cpu, working_set))
                .collect(),
        )
    }

    /// Exit on its own just before the first kill request lands.
    pub fn exit_before_kill(mut self, exit: ChildExit) -> Self {
        self.exit_before_kill = Some(exit);
        self
    }

    /// Make every kill request fail.
    pub fn fail_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    /// Cancel `token` while taking sample number `tick` (1-based).
    pub fn cancel_at(mut self, tick: u64, token: CancelToken) -> Self {
        self.cancel_at = Some((tick, token));
        self
    }

    pub fn terminate_calls(&self) -> u32 {
        self.terminate_calls
    }

    /// Whether a kill actually hit a live process.
    pub fn was_killed(&self) -> bool {
        self.killed
    }

    pub fn samples_taken(&self) -> u64 {
        self.samples_taken
    }

    fn current(&self) -> Option<&FakeStep> {
        self.steps.get(self.cursor.min(self.steps.len().saturating_sub(1)))
    }

    fn unavailable(&self, reason: Unavailable) -> RunguardError {
        RunguardError::ProcessUnavailable {
            pid: FAKE_PID,
            reason,
        }
    }
}

impl SupervisedProcess for FakeProcess {
    fn pid(&self) -> u32 {
        FAKE_PID
    }

    fn poll_exit(&mut self) -> Result<Option<ChildExit>> {
        if self.exited.is_some() {
            return Ok(self.exited);
        }
        match self.current().cloned() {
            Some(FakeStep::Exit(exit)) => {
                self.exited = Some(exit);
                Ok(Some(exit))
            }
            Some(FakeStep::VanishedThenExited(exit)) => {
                if self.vanish_seen {
                    self.exited = Some(exit);
                    Ok(Some(exit))
                } else {
                    self.vanish_seen = true;
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn sample(&mut self) -> Result<Usage> {
        self.samples_taken += 1;
        if let Some((tick, token)) = &self.cancel_at {
            if *tick == self.samples_taken {
                token.cancel();
            }
        }

        if self.exited.is_some() {
            return Err(self.unavailable(Unavailable::Exited));
        }

        let step = self.current().cloned();
        if self.cursor + 1 < self.steps.len() {
            self.cursor += 1;
        }

        match step {
            Some(FakeStep::Usage { cpu_ms, working_set }) => Ok(Usage {
                cpu_time_ms: cpu_ms,
                working_set_bytes: working_set,
                peak_working_set_bytes: 0,
            }),
            Some(FakeStep::Unreadable(reason)) => Err(self.unavailable(Unavailable::Os(reason))),
            Some(FakeStep::Exit(_)) | Some(FakeStep::VanishedThenExited(_)) => {
                Err(self.unavailable(Unavailable::Exited))
            }
            None => Ok(Usage::default()),
        }
    }

    fn terminate(&mut self) -> Result<KillReport> {
        self.terminate_calls += 1;
        if self.fail_terminate {
            return Err(RunguardError::Process("kill(SIGKILL) failed: EPERM".to_string()));
        }
        if let Some(exit) = self.exit_before_kill.take() {
            self.exited = Some(exit);
        }
        if self.exited.is_some() {
            return Ok(KillReport::already_exited(self.exited));
        }

        let exit = ChildExit::Signaled(libc::SIGKILL);
        self.exited = Some(exit);
        self.killed = true;
        Ok(KillReport {
            kill_sent: true,
            already_exited: false,
            exit: Some(exit),
            notes: Vec::new(),
        })
    }
}
