//! Real child process behind the `SupervisedProcess` capability.

use crate::config::types::{Result, RunguardError, Unavailable};
use crate::core::types::{ChildExit, KillReport, SupervisedProcess, Usage};
use crate::kernel::procfs;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::process::Child;

/// A spawned child that leads its own process group.
///
/// Owns the `std::process::Child`; the exit status is cached once reaped so
/// later queries never touch a recycled pid. Dropping a live `ChildProcess`
/// kills its group.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: u32,
    ticks_per_second: u64,
    exit: Option<ChildExit>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            ticks_per_second: procfs::clock_ticks_per_second(),
            exit: None,
        }
    }

    /// Block until the child exits.
    pub fn wait(&mut self) -> Result<ChildExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let status = self
            .child
            .wait()
            .map_err(|e| RunguardError::Process(format!("wait({}): {}", self.pid, e)))?;
        let exit = ChildExit::from(status);
        self.exit = Some(exit);
        Ok(exit)
    }

    fn send_kill(&self, report: &mut KillReport) -> Result<()> {
        let pid = Pid::from_raw(self.pid as i32);
        match killpg(pid, Signal::SIGKILL) {
            Ok(()) => {
                report.kill_sent = true;
                return Ok(());
            }
            Err(Errno::ESRCH) => {}
            Err(e) => report
                .notes
                .push(format!("group SIGKILL to {} failed, killing leader only: {}", self.pid, e)),
        }

        match kill(pid, Signal::SIGKILL) {
            Ok(()) => {
                report.kill_sent = true;
                Ok(())
            }
            // gone already; the reap below collects the status
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RunguardError::Process(format!(
                "kill({}, SIGKILL) failed: {}",
                self.pid, e
            ))),
        }
    }
}

impl SupervisedProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll_exit(&mut self) -> Result<Option<ChildExit>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let exit = ChildExit::from(status);
                log::debug!("pid {} exited: {:?}", self.pid, exit);
                self.exit = Some(exit);
                Ok(self.exit)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RunguardError::Process(format!("waitpid({}): {}", self.pid, e))),
        }
    }

    fn sample(&mut self) -> Result<Usage> {
        if self.exit.is_some() {
            return Err(RunguardError::ProcessUnavailable {
                pid: self.pid,
                reason: Unavailable::Exited,
            });
        }
        procfs::sample_usage(self.pid, self.ticks_per_second)
    }

    fn terminate(&mut self) -> Result<KillReport> {
        if self.exit.is_some() {
            return Ok(KillReport::already_exited(self.exit));
        }

        let mut report = KillReport::default();
        self.send_kill(&mut report)?;
        let exit = self.wait()?;
        report.exit = Some(exit);
        // no signal landed, so the child was already a zombie
        if !report.kill_sent {
            report.already_exited = true;
        }
        Ok(report)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            if let Err(e) = self.terminate() {
                log::warn!("Failed to kill pid {} on drop: {}", self.pid, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::time::Duration;

    fn spawn(program: &str, args: &[&str]) -> ChildProcess {
        let child = Command::new(program)
            .args(args)
            .process_group(0)
            .spawn()
            .unwrap();
        ChildProcess::new(child)
    }

    #[test]
    fn test_exit_code_is_reported() {
        let mut process = spawn("/bin/sh", &["-c", "exit 7"]);
        assert_eq!(process.wait().unwrap(), ChildExit::Exited(7));
        assert_eq!(process.poll_exit().unwrap(), Some(ChildExit::Exited(7)));
    }

    #[test]
    fn test_sample_live_child() {
        let mut process = spawn("sleep", &["5"]);
        let usage = process.sample().unwrap();
        assert!(usage.working_set_bytes > 0 || usage.peak_working_set_bytes > 0);
        process.terminate().unwrap();
    }

    #[test]
    fn test_terminate_kills_and_is_idempotent() {
        let mut process = spawn("sleep", &["30"]);
        assert!(process.is_alive());

        let first = process.terminate().unwrap();
        assert!(first.kill_sent);
        assert_eq!(first.exit, Some(ChildExit::Signaled(libc::SIGKILL)));

        let second = process.terminate().unwrap();
        assert!(second.already_exited);
        assert!(!process.is_alive());
    }

    #[test]
    fn test_terminate_after_natural_exit() {
        let mut process = spawn("true", &[]);
        std::thread::sleep(Duration::from_millis(200));
        // exited but not reaped yet: still not an error
        let report = process.terminate().unwrap();
        assert_eq!(report.exit, Some(ChildExit::Exited(0)));
        assert!(matches!(
            process.sample(),
            Err(RunguardError::ProcessUnavailable { reason: Unavailable::Exited, .. })
        ));
    }
}
