/// Core types and structures for the runguard system
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default fraction of one core a process must use to count as active.
pub const DEFAULT_REQUIRED_LOAD: f64 = 0.05;

/// Default sampling interval of the enforcement loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Why a process could not be sampled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unavailable {
    /// The process is gone or is a zombie waiting to be reaped
    Exited,
    /// The query itself failed (permissions, malformed /proc data, OS error)
    Os(String),
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::Exited => write!(f, "process exited"),
            Unavailable::Os(reason) => write!(f, "{}", reason),
        }
    }
}

/// Custom error types for runguard
#[derive(Error, Debug)]
pub enum RunguardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Process {pid} unavailable: {reason}")]
    ProcessUnavailable { pid: u32, reason: Unavailable },

    #[error("Sampler fault: {0}")]
    SamplerFault(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Signal setup error: {0}")]
    Signal(String),
}

pub type Result<T> = std::result::Result<T, RunguardError>;

impl From<nix::errno::Errno> for RunguardError {
    fn from(err: nix::errno::Errno) -> Self {
        RunguardError::Process(err.to_string())
    }
}

/// Unvalidated limits as they arrive from a configuration source.
///
/// Bounds are signed so that a negative request can be rejected instead of
/// being unrepresentable; [`LimitSpec::new`] is the only way to turn this
/// into something the engine accepts.
#[derive(Clone, Debug, PartialEq)]
pub struct LimitRequest {
    pub time_limit_ms: Option<i64>,
    pub idle_limit_ms: Option<i64>,
    pub memory_limit_bytes: Option<i64>,
    pub required_load: f64,
    pub single_core: bool,
}

impl Default for LimitRequest {
    fn default() -> Self {
        Self {
            time_limit_ms: None,
            idle_limit_ms: None,
            memory_limit_bytes: None,
            required_load: DEFAULT_REQUIRED_LOAD,
            single_core: false,
        }
    }
}

/// Validated resource envelope for one supervised run.
///
/// Immutable after construction and safe to share by reference between
/// concurrently supervised children.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LimitSpec {
    time_limit_ms: Option<u64>,
    idle_limit_ms: Option<u64>,
    memory_limit_bytes: Option<u64>,
    required_load: f64,
    single_core: bool,
}

impl LimitSpec {
    /// Validate a request. Fails with `InvalidLimit` on any negative bound
    /// or a load fraction outside [0, 1].
    pub fn new(request: LimitRequest) -> Result<Self> {
        let time_limit_ms = non_negative("time limit", request.time_limit_ms)?;
        let idle_limit_ms = non_negative("idle limit", request.idle_limit_ms)?;
        let memory_limit_bytes = non_negative("memory limit", request.memory_limit_bytes)?;

        // NaN fails the range check as well
        if !(0.0..=1.0).contains(&request.required_load) {
            return Err(RunguardError::InvalidLimit(format!(
                "required load {} is outside [0, 1]",
                request.required_load
            )));
        }

        Ok(Self {
            time_limit_ms,
            idle_limit_ms,
            memory_limit_bytes,
            required_load: request.required_load,
            single_core: request.single_core,
        })
    }

    /// Envelope with no bounds at all.
    pub fn unbounded() -> Self {
        Self {
            time_limit_ms: None,
            idle_limit_ms: None,
            memory_limit_bytes: None,
            required_load: DEFAULT_REQUIRED_LOAD,
            single_core: false,
        }
    }

    pub fn time_limit_ms(&self) -> Option<u64> {
        self.time_limit_ms
    }

    pub fn idle_limit_ms(&self) -> Option<u64> {
        self.idle_limit_ms
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_bytes
    }

    pub fn required_load(&self) -> f64 {
        self.required_load
    }

    pub fn single_core(&self) -> bool {
        self.single_core
    }

    /// Largest poll interval that keeps measurement error within a tenth of
    /// the tightest time-based limit. `None` when no time-based limit is set.
    pub fn max_poll_interval(&self) -> Option<Duration> {
        let smallest = match (self.time_limit_ms, self.idle_limit_ms) {
            (Some(t), Some(i)) => t.min(i),
            (Some(t), None) => t,
            (None, Some(i)) => i,
            (None, None) => return None,
        };
        Some(Duration::from_millis((smallest / 10).max(1)))
    }
}

fn non_negative(name: &str, value: Option<i64>) -> Result<Option<u64>> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(RunguardError::InvalidLimit(format!(
            "{} must not be negative (got {})",
            name, v
        ))),
        Some(v) => Ok(Some(v as u64)),
    }
}

/// What the child may create besides its own main thread
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPolicy {
    /// No new processes and no new threads
    #[default]
    Deny,
    /// Threads inside the child, but no new processes
    ThreadsOnly,
    /// No restriction
    Allow,
}

impl ProcessPolicy {
    /// Policy from the two command-line switches; allowing processes
    /// implies allowing threads.
    pub fn from_flags(allow_processes: bool, allow_threads: bool) -> Self {
        match (allow_processes, allow_threads) {
            (true, _) => ProcessPolicy::Allow,
            (false, true) => ProcessPolicy::ThreadsOnly,
            (false, false) => ProcessPolicy::Deny,
        }
    }

    /// Whether a syscall filter has to be installed in the child.
    pub fn is_restricted(&self) -> bool {
        !matches!(self, ProcessPolicy::Allow)
    }
}

impl std::fmt::Display for ProcessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessPolicy::Deny => write!(f, "deny"),
            ProcessPolicy::ThreadsOnly => write!(f, "threads_only"),
            ProcessPolicy::Allow => write!(f, "allow"),
        }
    }
}

/// Where a standard stream of the child goes
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum StdioTarget {
    /// Share the supervisor's stream
    #[default]
    Inherit,
    /// Read from / write to a file
    File(PathBuf),
}

/// Complete, validated description of one supervised run
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Resource envelope
    pub limits: LimitSpec,
    /// Requested sampling interval (clamped against the limits at run time)
    pub poll_interval: Duration,
    /// Working directory for the child, created if missing
    pub working_dir: Option<PathBuf>,
    /// Run the child as this user
    pub user: Option<String>,
    /// Process and thread creation allowed to the child
    pub process_policy: ProcessPolicy,
    /// Explicit environment; when non-empty the inherited one is dropped
    pub environment: Vec<(String, String)>,
    pub stdin: StdioTarget,
    pub stdout: StdioTarget,
    pub stderr: StdioTarget,
    /// JSON statistics record written after the run
    pub stats_file: Option<PathBuf>,
    /// Per-tick CSV trace
    pub trace_file: Option<PathBuf>,
    /// Return the child's exit code instead of 0 on normal completion
    pub propagate_exit_code: bool,
    /// Suppress the human-readable summary
    pub quiet: bool,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, limits: LimitSpec) -> Self {
        Self {
            program: program.into(),
            args,
            limits,
            poll_interval: DEFAULT_POLL_INTERVAL,
            working_dir: None,
            user: None,
            process_policy: ProcessPolicy::default(),
            environment: Vec::new(),
            stdin: StdioTarget::Inherit,
            stdout: StdioTarget::Inherit,
            stderr: StdioTarget::Inherit,
            stats_file: None,
            trace_file: None,
            propagate_exit_code: false,
            quiet: false,
        }
    }

    /// Sampling interval actually used by the engine.
    pub fn effective_poll_interval(&self) -> Duration {
        match self.limits.max_poll_interval() {
            Some(max) => self.poll_interval.min(max).max(Duration::from_millis(1)),
            None => self.poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Set or replace an environment variable, keeping first-seen order.
    pub fn set_env(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.environment.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            self.environment.push((key.to_string(), value.to_string()));
        }
    }

    /// Program name without its directory, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}
