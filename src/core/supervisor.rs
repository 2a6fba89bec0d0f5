use crate::config::types::{LimitSpec, ProcessPolicy, Result, RunguardError, SupervisorConfig};
use crate::core::cancel::CancelToken;
use crate::core::clock::Clock;
use crate::core::load::LoadTracker;
use crate::core::types::{ChildExit, Phase, RunState, Sample, SupervisedProcess};
use crate::kernel::seccomp::VIOLATION_SIGNAL;
use crate::verdict::verdict::{Verdict, VerdictBuilder};
use std::time::{Duration, Instant};

/// Per-run knobs of the poll loop that are not part of the limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    /// Sleep between ticks
    pub poll_interval: Duration,
    /// Cores the child may run on; bounds the observed load
    pub core_count: usize,
    /// Filter the child was launched under; decides how a SIGSYS death reads
    pub process_policy: ProcessPolicy,
}

impl EngineOptions {
    /// Options for a child launched without a process filter.
    pub fn new(poll_interval: Duration, core_count: usize) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            core_count: core_count.max(1),
            process_policy: ProcessPolicy::Allow,
        }
    }

    pub fn with_process_policy(mut self, policy: ProcessPolicy) -> Self {
        self.process_policy = policy;
        self
    }

    pub fn from_config(config: &SupervisorConfig, core_count: usize) -> Self {
        Self::new(config.effective_poll_interval(), core_count)
            .with_process_policy(config.process_policy)
    }

    /// Terminal phase for a child that ended on its own.
    fn exit_phase(&self, status: ChildExit) -> Phase {
        if self.process_policy.is_restricted() && status.signal() == Some(VIOLATION_SIGNAL) {
            Phase::ProcessCreationDenied
        } else {
            Phase::Completing
        }
    }
}

/// What the engine saw on one tick, handed to observers.
#[derive(Clone, Copy, Debug)]
pub struct TickReport {
    pub tick: u64,
    pub timestamp: Instant,
    pub wall_time_ms: u64,
    /// CPU load over the tick; `None` when no wall time passed
    pub load: Option<f64>,
    pub cpu_time_ms: u64,
    pub working_set_bytes: u64,
    pub cumulative_idle_ms: u64,
}

/// Passive hook into the poll loop (trace files, progress output).
///
/// Observers cannot influence the run; they only see what happened.
pub trait TickObserver {
    fn on_tick(&mut self, report: &TickReport);

    fn on_verdict(&mut self, _verdict: &Verdict) {}
}

enum TickOutcome {
    Continue,
    Exited(ChildExit),
    Limit(Phase),
}

/// Poll-loop state machine enforcing one `LimitSpec` on one child.
///
/// Every path out of [`EnforcementEngine::supervise`] yields a `Verdict`;
/// errors from the process capability are folded into `SupervisorError`.
pub struct EnforcementEngine<'a, C: Clock> {
    limits: &'a LimitSpec,
    options: EngineOptions,
    clock: C,
    cancel: CancelToken,
    tracker: LoadTracker,
    observers: Vec<Box<dyn TickObserver + 'a>>,
}

impl<'a, C: Clock> EnforcementEngine<'a, C> {
    pub fn new(limits: &'a LimitSpec, options: EngineOptions, clock: C, cancel: CancelToken) -> Self {
        let tracker = LoadTracker::new(limits.required_load(), options.core_count);
        Self {
            limits,
            options,
            clock,
            cancel,
            tracker,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TickObserver + 'a>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Launch through `launch` and supervise the result. A launch failure
    /// becomes a `SupervisorError` verdict without any tick being run.
    pub fn run_launched<P, F>(&mut self, launch: F) -> Verdict
    where
        P: SupervisedProcess,
        F: FnOnce() -> Result<P>,
    {
        let started = self.clock.now();
        match launch() {
            Ok(mut process) => self.supervise(&mut process),
            Err(e) => {
                log::error!("Launch failed: {}", e);
                let verdict = VerdictBuilder::launch_failure(started, self.clock.now(), e.to_string());
                self.notify_verdict(&verdict);
                verdict
            }
        }
    }

    /// Run the poll loop until the child exits, a limit fires, the token is
    /// cancelled or the process capability fails.
    pub fn supervise<P: SupervisedProcess>(&mut self, process: &mut P) -> Verdict {
        let mut state = RunState::new(self.clock.now());
        state.phase = Phase::Running;
        let mut exit = None;
        let mut detail = None;

        log::info!(
            "Supervising pid {} (time {:?}ms, idle {:?}ms, memory {:?}B, load {:.2}, poll {:?})",
            process.pid(),
            self.limits.time_limit_ms(),
            self.limits.idle_limit_ms(),
            self.limits.memory_limit_bytes(),
            self.limits.required_load(),
            self.options.poll_interval
        );

        loop {
            if self.cancel.is_cancelled() {
                state.phase = Phase::Cancelled;
                break;
            }

            state.ticks += 1;
            match self.tick(process, &mut state) {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Exited(status)) => {
                    exit = Some(status);
                    state.phase = self.options.exit_phase(status);
                    break;
                }
                Ok(TickOutcome::Limit(phase)) => {
                    state.phase = phase;
                    break;
                }
                Err(e) => {
                    log::error!("Supervision of pid {} failed: {}", process.pid(), e);
                    detail = Some(e.to_string());
                    state.phase = Phase::Faulted;
                    break;
                }
            }

            if self.clock.sleep(self.options.poll_interval, &self.cancel) {
                state.phase = Phase::Cancelled;
                break;
            }
        }

        match state.phase {
            Phase::Cancelled => log::info!("Run cancelled, killing pid {}", process.pid()),
            Phase::TimedOut | Phase::MemoryExceeded | Phase::IdleExceeded => {
                log::info!("Limit reached ({:?}), killing pid {}", state.phase, process.pid())
            }
            Phase::ProcessCreationDenied => log::info!(
                "pid {} was killed for creating a process (policy {})",
                process.pid(),
                self.options.process_policy
            ),
            _ => {}
        }

        if state.phase.requires_termination() {
            match process.terminate() {
                Ok(report) => {
                    if report.already_exited {
                        log::info!("pid {} had already exited before the kill", process.pid());
                    }
                    for note in &report.notes {
                        log::warn!("{}", note);
                    }
                }
                Err(e) => {
                    log::error!("Failed to terminate pid {}: {}", process.pid(), e);
                    detail = Some(format!("termination failed: {}", e));
                    state.phase = Phase::Faulted;
                }
            }
        } else if state.phase == Phase::Faulted {
            // never leave the child running behind a fault
            if let Err(e) = process.terminate() {
                log::warn!("Best-effort kill of pid {} failed: {}", process.pid(), e);
            }
        }

        let verdict = VerdictBuilder::finalize(&state, state.phase, exit, self.clock.now(), detail);
        log::info!(
            "Run finished: {} after {} ticks (wall {}ms, cpu {}ms, peak {}B)",
            verdict.outcome,
            verdict.ticks,
            verdict.wall_time_ms,
            verdict.cpu_time_ms,
            verdict.peak_memory_bytes
        );
        self.notify_verdict(&verdict);
        verdict
    }

    /// One poll tick: exit -> time -> memory -> idle.
    fn tick<P: SupervisedProcess>(&mut self, process: &mut P, state: &mut RunState) -> Result<TickOutcome> {
        if let Some(status) = process.poll_exit()? {
            return Ok(TickOutcome::Exited(status));
        }

        let usage = match process.sample() {
            Ok(usage) => usage,
            Err(RunguardError::ProcessUnavailable { pid, reason }) => {
                // the process may have exited between the two queries
                return match process.poll_exit()? {
                    Some(status) => {
                        log::debug!("pid {} vanished during sampling, exit reconciled", pid);
                        Ok(TickOutcome::Exited(status))
                    }
                    None => Err(RunguardError::ProcessUnavailable { pid, reason }),
                };
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        let sample = Sample::new(now, usage);
        let previous = state.last_sample;
        if sample.cpu_time_ms < previous.cpu_time_ms {
            return Err(RunguardError::SamplerFault(format!(
                "cpu time of pid {} went backwards ({}ms -> {}ms)",
                process.pid(),
                previous.cpu_time_ms,
                sample.cpu_time_ms
            )));
        }

        let elapsed_ms = sample.elapsed_since(&previous);
        let load = self.tracker.observed_load(&previous, &sample, elapsed_ms);
        state.record(sample);
        let wall_time_ms = now.saturating_duration_since(state.start_time).as_millis() as u64;

        let mut fired = None;
        if self.limits.time_limit_ms().is_some_and(|limit| wall_time_ms >= limit) {
            fired = Some(Phase::TimedOut);
        } else if self
            .limits
            .memory_limit_bytes()
            .is_some_and(|limit| sample.working_set_bytes >= limit)
        {
            fired = Some(Phase::MemoryExceeded);
        } else {
            if self.tracker.update(&previous, &sample, elapsed_ms) {
                state.cumulative_idle_ms += elapsed_ms;
            } else {
                state.cumulative_idle_ms = 0;
            }
            if self
                .limits
                .idle_limit_ms()
                .is_some_and(|limit| state.cumulative_idle_ms >= limit)
            {
                fired = Some(Phase::IdleExceeded);
            }
        }

        log::debug!(
            "tick {}: wall {}ms, cpu {}ms, ws {}B, load {}, idle streak {}ms",
            state.ticks,
            wall_time_ms,
            sample.cpu_time_ms,
            sample.working_set_bytes,
            load.map(|l| format!("{:.0}%", l * 100.0)).unwrap_or_else(|| "-".to_string()),
            state.cumulative_idle_ms
        );

        let report = TickReport {
            tick: state.ticks,
            timestamp: now,
            wall_time_ms,
            load,
            cpu_time_ms: sample.cpu_time_ms,
            working_set_bytes: sample.working_set_bytes,
            cumulative_idle_ms: state.cumulative_idle_ms,
        };
        for observer in self.observers.iter_mut() {
            observer.on_tick(&report);
        }

        Ok(match fired {
            Some(phase) => TickOutcome::Limit(phase),
            None => TickOutcome::Continue,
        })
    }

    fn notify_verdict(&mut self, verdict: &Verdict) {
        for observer in self.observers.iter_mut() {
            observer.on_verdict(verdict);
        }
    }
}
