// Config Validation
// Startup validation of a supervisor configuration: fail fast with
// actionable errors before anything is launched.

use crate::config::types::{Result, RunguardError, StdioTarget, SupervisorConfig};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup. Errors are fatal; warnings are returned for
/// the caller to log.
pub fn validate_config(config: &SupervisorConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_program(config, &mut result);
    validate_interval(config, &mut result);
    validate_limits(config, &mut result);
    validate_streams(config, &mut result);
    validate_environment(config, &mut result);

    if !result.is_valid() {
        return Err(RunguardError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_program(config: &SupervisorConfig, result: &mut ValidationResult) {
    if config.program.as_os_str().is_empty() {
        result.add_error("no program to run".to_string());
    }
}

fn validate_interval(config: &SupervisorConfig, result: &mut ValidationResult) {
    if config.poll_interval.is_zero() {
        result.add_error("poll interval cannot be zero".to_string());
        return;
    }

    let effective = config.effective_poll_interval();
    if effective < config.poll_interval {
        result.add_warning(format!(
            "poll interval {:?} exceeds a tenth of the smallest time limit, using {:?}",
            config.poll_interval, effective
        ));
    }
}

fn validate_limits(config: &SupervisorConfig, result: &mut ValidationResult) {
    let limits = &config.limits;

    if limits.idle_limit_ms().is_some() && limits.required_load() == 0.0 {
        result.add_warning(
            "idle limit is set but required load is 0; the process can never be idle".to_string(),
        );
    }

    if let Some(memory) = limits.memory_limit_bytes() {
        if memory < 1024 * 1024 {
            result.add_warning(format!(
                "memory limit {} bytes is very low (< 1MB), most programs will exceed it at startup",
                memory
            ));
        }
    }

    if let (Some(time), Some(idle)) = (limits.time_limit_ms(), limits.idle_limit_ms()) {
        if idle >= time {
            result.add_warning(format!(
                "idle limit ({}ms) is not below the time limit ({}ms) and can never fire",
                idle, time
            ));
        }
    }
}

fn validate_streams(config: &SupervisorConfig, result: &mut ValidationResult) {
    if let StdioTarget::File(path) = &config.stdin {
        if !path.is_file() {
            result.add_error(format!("input file {} does not exist", path.display()));
        }
    }

    if let (StdioTarget::File(out), StdioTarget::File(err)) = (&config.stdout, &config.stderr) {
        if out == err {
            result.add_warning(format!(
                "stdout and stderr both truncate {}; output will interleave",
                out.display()
            ));
        }
    }
}

fn validate_environment(config: &SupervisorConfig, result: &mut ValidationResult) {
    for (key, _) in &config.environment {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            result.add_error(format!("invalid environment variable name '{}'", key));
        }
    }
}
