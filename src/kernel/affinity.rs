//! CPU affinity: least-loaded core selection and core counting.

use crate::config::types::{Result, RunguardError};
use crate::kernel::procfs::{self, CpuTimes};
use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use std::time::Duration;

/// Window over which per-CPU busy time is compared.
const LOAD_SAMPLE_WINDOW: Duration = Duration::from_millis(50);

/// CPUs the given process (or the caller, for `None`) may run on.
pub fn allowed_cpus(pid: Option<u32>) -> Result<Vec<usize>> {
    let pid = pid.map(|p| Pid::from_raw(p as i32)).unwrap_or_else(|| Pid::from_raw(0));
    let set = sched_getaffinity(pid)?;
    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}

/// Online CPUs, for when the affinity mask cannot be read.
pub fn online_cpus() -> usize {
    // SAFETY: sysconf has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as usize
    } else {
        1
    }
}

/// Number of cores a child launched by this process can use.
pub fn core_count(single_core: bool) -> usize {
    if single_core {
        return 1;
    }
    match allowed_cpus(None) {
        Ok(cpus) if !cpus.is_empty() => cpus.len(),
        Ok(_) => online_cpus(),
        Err(e) => {
            log::warn!("Cannot read CPU affinity ({}), using online CPU count", e);
            online_cpus()
        }
    }
}

/// CPU among `allowed` whose busy time grew least between two readings.
/// Ties go to the lowest CPU number.
pub fn least_loaded_cpu(allowed: &[usize], before: &[CpuTimes], after: &[CpuTimes]) -> Option<usize> {
    allowed
        .iter()
        .filter_map(|&cpu| {
            let first = before.iter().find(|t| t.cpu == cpu)?;
            let second = after.iter().find(|t| t.cpu == cpu)?;
            Some((second.busy.saturating_sub(first.busy), cpu))
        })
        .min()
        .map(|(_, cpu)| cpu)
}

/// Pick the least busy CPU this process may use, measured over a short window.
pub fn pick_least_loaded_cpu() -> Result<usize> {
    let allowed = allowed_cpus(None)?;
    let before = procfs::read_cpu_times()?;
    std::thread::sleep(LOAD_SAMPLE_WINDOW);
    let after = procfs::read_cpu_times()?;

    let cpu = least_loaded_cpu(&allowed, &before, &after)
        .or_else(|| allowed.first().copied())
        .ok_or_else(|| RunguardError::Launch("no CPU available in affinity mask".to_string()))?;
    log::info!("Selected CPU {} (least loaded of {:?})", cpu, allowed);
    Ok(cpu)
}

/// Single-CPU mask, built before fork so the child only has to apply it.
pub fn single_cpu_set(cpu: usize) -> Result<CpuSet> {
    let mut set = CpuSet::new();
    set.set(cpu)?;
    Ok(set)
}

/// Apply `set` to the calling process. Async-signal-safe; used in `pre_exec`.
pub fn apply_to_self(set: &CpuSet) -> std::io::Result<()> {
    sched_setaffinity(Pid::from_raw(0), set).map_err(std::io::Error::from)
}
