//! Human-readable run summary.

use crate::config::types::LimitSpec;
use crate::verdict::verdict::{Outcome, Verdict};

/// `-` for zero, whole bytes below 1kb, one decimal above.
pub fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    match bytes {
        0 => "-".to_string(),
        b if b < KB => format!("{}b", b),
        b if b < MB => format!("{:.1}kb", b as f64 / KB as f64),
        b => format!("{:.1}mb", b as f64 / MB as f64),
    }
}

/// Memory limit value; unlike a measurement, zero is a real bound.
pub fn format_limit_memory(bytes: u64) -> String {
    match bytes {
        0 => "0b".to_string(),
        b => format_memory(b),
    }
}

/// Load fraction as a whole percent, clamped to [0%, 100%].
pub fn format_load(load: f64) -> String {
    format!("{:.0}%", load.clamp(0.0, 1.0) * 100.0)
}

/// Measured duration with centisecond precision.
pub fn format_seconds(ms: u64) -> String {
    format!("{:.2}s", ms as f64 / 1000.0)
}

/// Limit value in the largest unit that divides it evenly.
pub fn format_limit_time(ms: u64) -> String {
    match ms {
        0 => "0s".to_string(),
        ms if ms % 3_600_000 == 0 => format!("{}h", ms / 3_600_000),
        ms if ms % 60_000 == 0 => format!("{}m", ms / 60_000),
        ms if ms % 1000 == 0 => format!("{}s", ms / 1000),
        ms => format!("{}ms", ms),
    }
}

/// One-line summary, e.g.
/// `runguard: time limit 1s exceeded [wall 1.00s, cpu 0.98s, peak 4.8mb]`.
pub fn summary(verdict: &Verdict, limits: &LimitSpec, program: &str) -> String {
    let what = match verdict.outcome {
        Outcome::Completed => match (verdict.term_signal, verdict.child_exit_code) {
            (Some(signal), _) => format!("{} terminated by signal {}", program, signal),
            (None, Some(code)) => format!("{} exited with code {}", program, code),
            (None, None) => format!("{} exited", program),
        },
        Outcome::TimeLimitExceeded => format!(
            "time limit {} exceeded",
            limits.time_limit_ms().map(format_limit_time).unwrap_or_default()
        ),
        Outcome::MemoryLimitExceeded => format!(
            "memory limit {} exceeded",
            limits.memory_limit_bytes().map(format_limit_memory).unwrap_or_default()
        ),
        Outcome::IdleLimitExceeded => format!(
            "idle limit {} exceeded (load below {})",
            limits.idle_limit_ms().map(format_limit_time).unwrap_or_default(),
            format_load(limits.required_load())
        ),
        Outcome::ProcessCreationDenied => {
            format!("{} killed for creating a process or thread", program)
        }
        Outcome::Cancelled => format!("{} cancelled", program),
        Outcome::SupervisorError => format!(
            "supervisor error: {}",
            verdict.detail.as_deref().unwrap_or("unknown failure")
        ),
    };

    format!(
        "runguard: {} [wall {}, cpu {}, peak {}]",
        what,
        format_seconds(verdict.wall_time_ms),
        format_seconds(verdict.cpu_time_ms),
        format_memory(verdict.peak_memory_bytes)
    )
}

/// Print the summary to stderr.
pub fn print_summary(verdict: &Verdict, limits: &LimitSpec, program: &str) {
    eprintln!("{}", summary(verdict, limits, program));
}
