/// Child launch
///
/// The launch sequence is fixed:
/// 1. resolve and create the working directory
/// 2. open stream redirections
/// 3. resolve the target user and check the switch is permitted
/// 4. pick a CPU when single-core mode is requested
/// 5. compile the process-creation filter unless processes are allowed
/// 6. spawn in a new process group; in the child, setgid/setuid (done by
///    std), pin the CPU, install the filter, then exec
use crate::config::types::{Result, RunguardError, StdioTarget, SupervisorConfig};
use crate::kernel::affinity;
use crate::kernel::credentials::{resolve_user, validate_switch};
use crate::kernel::process::ChildProcess;
use crate::kernel::seccomp::SpawnFilter;
use std::fs::{File, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Spawn the program described by `config` and hand back the live child.
pub fn launch(config: &SupervisorConfig) -> Result<ChildProcess> {
    let mut command = build_command(config)?;
    let child = command.spawn().map_err(|e| {
        RunguardError::Launch(format!("failed to start '{}': {}", config.program.display(), e))
    })?;

    log::info!(
        "Started '{}' as pid {}",
        config.program.display(),
        child.id()
    );
    Ok(ChildProcess::new(child))
}

/// Build the fully configured `Command` without spawning it.
pub fn build_command(config: &SupervisorConfig) -> Result<Command> {
    let mut command = Command::new(&config.program);
    command.args(&config.args);

    if let Some(dir) = &config.working_dir {
        let dir = prepare_working_dir(dir)?;
        log::debug!("Working directory: {}", dir.display());
        command.current_dir(dir);
    }

    if !config.environment.is_empty() {
        command.env_clear();
        command.envs(config.environment.iter().map(|(k, v)| (k, v)));
    }

    apply_stdio(&mut command, config)?;

    if let Some(name) = &config.user {
        let target = resolve_user(name)?;
        // SAFETY: geteuid has no preconditions.
        let euid = unsafe { libc::geteuid() };
        validate_switch(&target, euid)?;
        if target.uid != euid {
            log::info!("Child runs as {} (uid={}, gid={})", target.name, target.uid, target.gid);
            command.gid(target.gid);
            command.uid(target.uid);
        }
    }

    command.process_group(0);

    if config.limits.single_core() {
        let cpu = affinity::pick_least_loaded_cpu()?;
        let set = affinity::single_cpu_set(cpu)?;
        // SAFETY: the closure only issues sched_setaffinity on a mask built
        // before fork; no allocation or locking happens in the child.
        unsafe {
            command.pre_exec(move || affinity::apply_to_self(&set));
        }
    }

    // installed last: nothing after it may clone
    if let Some(filter) = SpawnFilter::for_policy(config.process_policy)? {
        log::debug!(
            "Process policy {}: {} filter instructions",
            config.process_policy,
            filter.len()
        );
        // SAFETY: install() issues prctl and seccomp on a program compiled
        // before fork; no allocation or locking happens in the child.
        unsafe {
            command.pre_exec(move || filter.install());
        }
    }

    Ok(command)
}

/// Absolute working directory, created if missing.
pub fn prepare_working_dir(dir: &Path) -> Result<PathBuf> {
    let dir = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    if !dir.is_dir() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            RunguardError::Launch(format!(
                "cannot create working directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        log::info!("Created working directory {}", dir.display());
    }
    Ok(dir)
}

fn apply_stdio(command: &mut Command, config: &SupervisorConfig) -> Result<()> {
    if let StdioTarget::File(path) = &config.stdin {
        let file = File::open(path).map_err(|e| open_error("stdin", path, e))?;
        command.stdin(Stdio::from(file));
    }

    let stdout = match &config.stdout {
        StdioTarget::File(path) => Some(create_output(path).map_err(|e| open_error("stdout", path, e))?),
        StdioTarget::Inherit => None,
    };

    match (&config.stderr, &stdout) {
        // one file for both streams: share the descriptor so writes interleave
        (StdioTarget::File(err_path), Some(out_file))
            if Some(err_path) == file_target(&config.stdout) =>
        {
            command.stderr(Stdio::from(out_file.try_clone()?));
        }
        (StdioTarget::File(path), _) => {
            let file = create_output(path).map_err(|e| open_error("stderr", path, e))?;
            command.stderr(Stdio::from(file));
        }
        (StdioTarget::Inherit, _) => {}
    }

    if let Some(file) = stdout {
        command.stdout(Stdio::from(file));
    }
    Ok(())
}

fn file_target(target: &StdioTarget) -> Option<&PathBuf> {
    match target {
        StdioTarget::File(path) => Some(path),
        StdioTarget::Inherit => None,
    }
}

fn create_output(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

fn open_error(stream: &str, path: &Path, err: std::io::Error) -> RunguardError {
    RunguardError::Launch(format!("cannot open {} file {}: {}", stream, path.display(), err))
}
