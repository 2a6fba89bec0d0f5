//! Readers for the Linux `/proc` filesystem.
//!
//! Parsing is split from I/O so the formats can be tested on fixed input.

use crate::config::types::{Result, RunguardError, Unavailable};
use crate::core::types::Usage;
use std::io::ErrorKind;
use std::path::Path;

/// Fields of `/proc/<pid>/stat` the sampler needs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcStat {
    pub state: char,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
}

impl ProcStat {
    /// Zombie or dead. For a thread group leader this alone does not mean
    /// the process is gone; see [`sample_usage_in`].
    pub fn has_exited(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }

    pub fn cpu_time_ms(&self, ticks_per_second: u64) -> u64 {
        ticks_to_ms(self.utime_ticks + self.stime_ticks, ticks_per_second)
    }
}

/// Busy/total jiffies of one CPU from `/proc/stat`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuTimes {
    pub cpu: usize,
    pub busy: u64,
    pub total: u64,
}

/// Parse the contents of `/proc/<pid>/stat`.
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`.
pub fn parse_stat(contents: &str) -> Option<ProcStat> {
    let rest = &contents[contents.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state); utime and stime are fields 14 and 15
    let state = fields.first()?.chars().next()?;
    let utime_ticks = fields.get(11)?.parse().ok()?;
    let stime_ticks = fields.get(12)?.parse().ok()?;
    Some(ProcStat {
        state,
        utime_ticks,
        stime_ticks,
    })
}

/// Resident and peak-resident bytes from `/proc/<pid>/status`.
/// Kernel threads and zombies have no Vm lines; they read as zero.
pub fn parse_status_memory(contents: &str) -> (u64, u64) {
    let mut rss = 0;
    let mut hwm = 0;
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("VmRSS:") {
            rss = parse_kb(value);
        } else if let Some(value) = line.strip_prefix("VmHWM:") {
            hwm = parse_kb(value);
        }
    }
    (rss, hwm)
}

fn parse_kb(value: &str) -> u64 {
    value
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

/// Per-CPU lines (`cpuN ...`) of `/proc/stat`; the aggregate `cpu` line is skipped.
pub fn parse_cpu_times(contents: &str) -> Vec<CpuTimes> {
    let mut cpus = Vec::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let label = match fields.next() {
            Some(label) => label,
            None => continue,
        };
        let cpu = match label.strip_prefix("cpu").and_then(|n| n.parse::<usize>().ok()) {
            Some(cpu) => cpu,
            None => continue,
        };
        let values: Vec<u64> = fields.filter_map(|v| v.parse().ok()).collect();
        if values.len() < 4 {
            continue;
        }
        // user nice system idle iowait irq softirq steal ...
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let busy = values[0]
            + values[1]
            + values[2]
            + values.get(5).copied().unwrap_or(0)
            + values.get(6).copied().unwrap_or(0)
            + values.get(7).copied().unwrap_or(0);
        cpus.push(CpuTimes {
            cpu,
            busy,
            total: busy + idle,
        });
    }
    cpus
}

pub fn ticks_to_ms(ticks: u64, ticks_per_second: u64) -> u64 {
    ticks.saturating_mul(1000) / ticks_per_second.max(1)
}

/// Kernel clock ticks per second (`USER_HZ`).
pub fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 {
        hz as u64
    } else {
        100
    }
}

fn unavailable(pid: u32, path: &Path, e: std::io::Error) -> RunguardError {
    let reason = if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH) {
        Unavailable::Exited
    } else {
        Unavailable::Os(format!("{}: {}", path.display(), e))
    };
    RunguardError::ProcessUnavailable { pid, reason }
}

fn read_proc_file(proc_root: &Path, pid: u32, name: &str) -> Result<String> {
    let path = proc_root.join(pid.to_string()).join(name);
    std::fs::read_to_string(&path).map_err(|e| unavailable(pid, &path, e))
}

/// Some thread of `pid` other than the leader that is still running.
fn live_thread(proc_root: &Path, pid: u32) -> Result<Option<u32>> {
    let dir = proc_root.join(pid.to_string()).join("task");
    let entries = std::fs::read_dir(&dir).map_err(|e| unavailable(pid, &dir, e))?;
    for entry in entries.flatten() {
        let tid = match entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
            Some(tid) if tid != pid => tid,
            _ => continue,
        };
        // threads may exit between the listing and the read
        let Ok(contents) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if parse_stat(&contents).is_some_and(|stat| !stat.has_exited()) {
            return Ok(Some(tid));
        }
    }
    Ok(None)
}

/// Current usage of `pid`. Read-only: never signals or stops the process.
pub fn sample_usage(pid: u32, ticks_per_second: u64) -> Result<Usage> {
    sample_usage_in(Path::new("/proc"), pid, ticks_per_second)
}

/// [`sample_usage`] against a procfs mounted at `proc_root`.
///
/// A zombie leader only means the process is gone once no other thread is
/// left: after `pthread_exit` in the main thread the remaining threads keep
/// running, and the memory lines then come from one of them. CPU time in
/// the leader's `stat` covers the whole thread group either way.
pub fn sample_usage_in(proc_root: &Path, pid: u32, ticks_per_second: u64) -> Result<Usage> {
    let stat = parse_stat(&read_proc_file(proc_root, pid, "stat")?).ok_or_else(|| {
        RunguardError::ProcessUnavailable {
            pid,
            reason: Unavailable::Os(format!("malformed /proc/{}/stat", pid)),
        }
    })?;

    let status_file = if stat.has_exited() {
        match live_thread(proc_root, pid)? {
            Some(tid) => format!("task/{}/status", tid),
            None => {
                return Err(RunguardError::ProcessUnavailable {
                    pid,
                    reason: Unavailable::Exited,
                })
            }
        }
    } else {
        "status".to_string()
    };

    let (working_set_bytes, peak_working_set_bytes) =
        parse_status_memory(&read_proc_file(proc_root, pid, &status_file)?);

    Ok(Usage {
        cpu_time_ms: stat.cpu_time_ms(ticks_per_second),
        working_set_bytes,
        peak_working_set_bytes,
    })
}

pub fn read_cpu_times() -> Result<Vec<CpuTimes>> {
    Ok(parse_cpu_times(&std::fs::read_to_string("/proc/stat")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "1234 (my (odd) prog) S 1 1234 1234 0 -1 4194560 120 0 0 0 \
                        37 13 0 0 20 0 1 0 5000 10240000 250 18446744073709551615";

    #[test]
    fn test_parse_stat_with_spaces_in_name() {
        let stat = parse_stat(STAT).unwrap();
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.utime_ticks, 37);
        assert_eq!(stat.stime_ticks, 13);
        assert!(!stat.has_exited());
        assert_eq!(stat.cpu_time_ms(100), 500);
    }

    #[test]
    fn test_parse_stat_zombie() {
        let stat = parse_stat("99 (sh) Z 1 99 99 0 -1 0 0 0 0 0 4 1 0 0").unwrap();
        assert!(stat.has_exited());
    }

    #[test]
    fn test_parse_stat_rejects_truncated_input() {
        assert_eq!(parse_stat("1234 (prog) S 1 2"), None);
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn test_parse_status_memory() {
        let status = "Name:\tcat\nVmPeak:\t  9000 kB\nVmHWM:\t    2048 kB\nVmRSS:\t    1024 kB\nThreads:\t1\n";
        assert_eq!(parse_status_memory(status), (1024 * 1024, 2048 * 1024));
        assert_eq!(parse_status_memory("Name:\tkthreadd\nState:\tS\n"), (0, 0));
    }

    #[test]
    fn test_parse_cpu_times_skips_aggregate() {
        let stat = "cpu  10 0 10 100 0 0 0 0 0 0\n\
                    cpu0 5 0 5 50 0 0 0 0 0 0\n\
                    cpu1 1 1 1 40 2 1 1 0 0 0\n\
                    intr 12345\n";
        let cpus = parse_cpu_times(stat);
        assert_eq!(cpus.len(), 2);
        assert_eq!(cpus[0], CpuTimes { cpu: 0, busy: 10, total: 60 });
        assert_eq!(cpus[1], CpuTimes { cpu: 1, busy: 5, total: 47 });
    }

    #[test]
    fn test_ticks_to_ms() {
        assert_eq!(ticks_to_ms(250, 100), 2500);
        assert_eq!(ticks_to_ms(1, 1000), 1);
        assert_eq!(ticks_to_ms(7, 0), 7000);
    }

    #[test]
    fn test_sample_own_process() {
        let usage = sample_usage(std::process::id(), clock_ticks_per_second()).unwrap();
        assert!(usage.working_set_bytes > 0);
    }

    #[test]
    fn test_sample_missing_process_is_exited() {
        // pid_max never reaches this on a default kernel
        let err = sample_usage(u32::MAX - 1, 100).unwrap_err();
        assert!(matches!(
            err,
            RunguardError::ProcessUnavailable {
                reason: Unavailable::Exited,
                ..
            }
        ));
    }

    /// Minimal procfs tree: `<root>/<pid>/{stat,status}` plus one
    /// `task/<tid>/{stat,status}` per thread.
    struct FakeProc {
        root: std::path::PathBuf,
    }

    impl FakeProc {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("runguard-proc-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        fn stat(pid: u32, state: char, utime: u64) -> String {
            format!("{} (worker) {} 1 {} {} 0 -1 0 0 0 0 0 {} 5 0 0 20 0 2 0 100", pid, state, pid, pid, utime)
        }

        fn status(rss_kb: Option<u64>) -> String {
            match rss_kb {
                Some(kb) => format!("Name:\tworker\nVmHWM:\t{} kB\nVmRSS:\t{} kB\n", kb * 2, kb),
                None => "Name:\tworker\nState:\tZ (zombie)\n".to_string(),
            }
        }

        fn write(&self, rel: &str, contents: &str) {
            let path = self.root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }

        fn thread(&self, pid: u32, tid: u32, state: char, rss_kb: Option<u64>) {
            self.write(&format!("{}/task/{}/stat", pid, tid), &Self::stat(tid, state, 0));
            self.write(&format!("{}/task/{}/status", pid, tid), &Self::status(rss_kb));
        }
    }

    impl Drop for FakeProc {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_zombie_leader_with_live_thread_is_running() {
        let fake = FakeProc::new();
        fake.write("500/stat", &FakeProc::stat(500, 'Z', 40));
        fake.write("500/status", &FakeProc::status(None));
        fake.thread(500, 500, 'Z', None);
        fake.thread(500, 501, 'S', Some(2048));

        let usage = sample_usage_in(&fake.root, 500, 100).unwrap();
        assert_eq!(usage.cpu_time_ms, 450);
        assert_eq!(usage.working_set_bytes, 2048 * 1024);
        assert_eq!(usage.peak_working_set_bytes, 4096 * 1024);
    }

    #[test]
    fn test_zombie_leader_without_live_threads_has_exited() {
        let fake = FakeProc::new();
        fake.write("600/stat", &FakeProc::stat(600, 'Z', 40));
        fake.write("600/status", &FakeProc::status(None));
        fake.thread(600, 600, 'Z', None);
        fake.thread(600, 601, 'X', None);

        let err = sample_usage_in(&fake.root, 600, 100).unwrap_err();
        assert!(matches!(
            err,
            RunguardError::ProcessUnavailable {
                reason: Unavailable::Exited,
                ..
            }
        ));
    }

    #[test]
    fn test_running_leader_reads_its_own_status() {
        let fake = FakeProc::new();
        fake.write("700/stat", &FakeProc::stat(700, 'R', 10));
        fake.write("700/status", &FakeProc::status(Some(512)));

        let usage = sample_usage_in(&fake.root, 700, 100).unwrap();
        assert_eq!(usage.cpu_time_ms, 150);
        assert_eq!(usage.working_set_bytes, 512 * 1024);
    }
}
