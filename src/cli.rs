use crate::config::types::{LimitRequest, LimitSpec, ProcessPolicy, StdioTarget, SupervisorConfig};
use crate::config::units::{parse_env_assignment, parse_load, parse_memory, parse_time};
use crate::config::validator::validate_config;
use crate::core::cancel::CancelToken;
use crate::core::clock::SystemClock;
use crate::core::supervisor::{EngineOptions, EnforcementEngine};
use crate::exec::launcher;
use crate::kernel::affinity;
use crate::kernel::signal::ShutdownSignals;
use crate::observability::report::print_summary;
use crate::observability::stats::{StatsRecord, TraceWriter};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Run a program under wall-time, memory and idleness limits.
///
/// Exit codes: the child's own code with -x (otherwise 0) when it finishes,
/// 1 supervisor error, 2 time limit, 3 memory limit, 4 idle limit,
/// 5 cancelled by a signal, 6 process creation denied. Invalid options and
/// limits are reported before launch and also exit with 1.
#[derive(Parser, Debug)]
#[command(name = "runguard", author, version, about, long_about = None)]
pub struct Cli {
    /// Wall-clock time limit: seconds, or with a unit (1500ms, 2s, 1m, 1h)
    #[arg(short = 't', long = "time-limit", value_name = "TIME")]
    pub time_limit: Option<String>,

    /// Working set limit: bytes, or with a unit (512K, 64M, 1G)
    #[arg(short = 'm', long = "memory-limit", value_name = "SIZE")]
    pub memory_limit: Option<String>,

    /// Load below which a tick counts as idle: fraction (0.05) or percent (5%)
    #[arg(short = 'r', long = "required-load", value_name = "LOAD")]
    pub required_load: Option<String>,

    /// Kill the program after it stays below the required load this long
    #[arg(short = 'y', long = "idle-limit", value_name = "TIME")]
    pub idle_limit: Option<String>,

    /// Working directory for the program (created if missing)
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Run the program as this user (name or uid)
    #[arg(short = 'l', long = "user", value_name = "USER")]
    pub user: Option<String>,

    /// Read the program's stdin from a file
    #[arg(short = 'i', long = "stdin", value_name = "FILE")]
    pub stdin: Option<PathBuf>,

    /// Write the program's stdout to a file
    #[arg(short = 'o', long = "stdout", value_name = "FILE")]
    pub stdout: Option<PathBuf>,

    /// Write the program's stderr to a file
    #[arg(short = 'e', long = "stderr", value_name = "FILE")]
    pub stderr: Option<PathBuf>,

    /// Write a JSON statistics record to a file
    #[arg(short = 's', long = "stats", value_name = "FILE")]
    pub stats: Option<PathBuf>,

    /// Write a per-tick CSV trace (time,load,working set) to a file
    #[arg(long = "trace", value_name = "FILE")]
    pub trace: Option<PathBuf>,

    /// Exit with the program's own exit code when it finishes
    #[arg(short = 'x', long = "propagate-exit-code")]
    pub propagate_exit_code: bool,

    /// Do not print the summary line
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Let the program create child processes (and threads)
    #[arg(long = "allow-processes")]
    pub allow_processes: bool,

    /// Let the program create threads, but no child processes
    #[arg(long = "allow-threads")]
    pub allow_threads: bool,

    /// Pin the program to the least loaded CPU
    #[arg(short = '1', long = "single-core")]
    pub single_core: bool,

    /// Environment variable for the program; any use drops the inherited environment
    #[arg(short = 'D', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Sampling interval (clamped to a tenth of the smallest time limit)
    #[arg(long = "poll-interval", value_name = "TIME", default_value = "20ms")]
    pub poll_interval: String,

    /// Verbose per-tick logging
    #[arg(long = "debug")]
    pub debug: bool,

    /// Program to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Turn parsed options into a validated-shape `SupervisorConfig`.
    pub fn into_config(self) -> crate::config::types::Result<SupervisorConfig> {
        let limits = LimitSpec::new(LimitRequest {
            time_limit_ms: self.time_limit.as_deref().map(parse_time).transpose()?,
            idle_limit_ms: self.idle_limit.as_deref().map(parse_time).transpose()?,
            memory_limit_bytes: self.memory_limit.as_deref().map(parse_memory).transpose()?,
            required_load: match self.required_load.as_deref() {
                Some(value) => parse_load(value)?,
                None => crate::config::types::DEFAULT_REQUIRED_LOAD,
            },
            single_core: self.single_core,
        })?;

        let mut command = self.command.into_iter();
        let program = command.next().unwrap_or_default();
        let mut config = SupervisorConfig::new(program, command.collect(), limits);

        let poll_ms = parse_time(&self.poll_interval)?;
        config.poll_interval = Duration::from_millis(poll_ms.max(0) as u64);
        config.working_dir = self.working_dir;
        config.user = self.user;
        config.stdin = to_target(self.stdin);
        config.stdout = to_target(self.stdout);
        config.stderr = to_target(self.stderr);
        config.stats_file = self.stats;
        config.trace_file = self.trace;
        config.process_policy = ProcessPolicy::from_flags(self.allow_processes, self.allow_threads);
        config.propagate_exit_code = self.propagate_exit_code;
        config.quiet = self.quiet;

        for assignment in &self.env {
            let (key, value) = parse_env_assignment(assignment)?;
            config.set_env(&key, &value);
        }

        Ok(config)
    }
}

fn to_target(path: Option<PathBuf>) -> StdioTarget {
    path.map(StdioTarget::File).unwrap_or_default()
}

fn init_logging(debug: bool, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else if quiet {
        builder.filter_level(log::LevelFilter::Error);
    }
    builder.format_target(false).init();
}

/// Parse arguments, supervise the program and return the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.quiet);

    let config = cli.into_config().context("invalid configuration")?;

    let validation = validate_config(&config)?;
    for warning in &validation.warnings {
        log::warn!("{}", warning);
    }

    // before any other thread exists, so all of them inherit the mask
    let cancel = CancelToken::new();
    let signals = ShutdownSignals::install(cancel.clone())?;

    let options = EngineOptions::from_config(&config, affinity::core_count(config.limits.single_core()));
    let mut engine = EnforcementEngine::new(&config.limits, options, SystemClock, cancel);
    if let Some(path) = &config.trace_file {
        let trace = TraceWriter::create(path)
            .with_context(|| format!("cannot create trace file {}", path.display()))?;
        engine = engine.with_observer(Box::new(trace));
    }

    let started_at = chrono::Local::now();
    let verdict = engine.run_launched(|| launcher::launch(&config));

    if let Some(signal) = signals.received() {
        log::info!("Run interrupted by {}", signal);
    }

    if !config.quiet {
        print_summary(&verdict, &config.limits, &config.program_name());
    }

    if let Some(path) = &config.stats_file {
        if let Err(e) = StatsRecord::new(&config, &verdict, started_at).write_to(path) {
            log::error!("Failed to write statistics to {}: {}", path.display(), e);
        }
    }

    Ok(verdict.exit_code(config.propagate_exit_code))
}
