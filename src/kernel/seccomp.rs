//! Process-creation filter for the child.
//!
//! A classic BPF program attached with seccomp between fork and exec. A
//! child that calls `fork`, `vfork` or `clone` for a new process is killed
//! with SIGSYS. Under `ThreadsOnly` a `clone` carrying `CLONE_THREAD`
//! passes. `clone3` hides its flags behind a pointer, so under `ThreadsOnly`
//! it fails with ENOSYS and libc falls back to plain `clone`.

use crate::config::types::{ProcessPolicy, Result, RunguardError};
use std::io;

// linux/filter.h
const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_JSET: u16 = 0x40;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

// linux/seccomp.h
const SECCOMP_SET_MODE_FILTER: libc::c_ulong = 1;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

// struct seccomp_data: nr, arch, instruction_pointer, args[6]
const DATA_NR: u32 = 0;
const DATA_ARCH: u32 = 4;
const DATA_ARG0_LOW: u32 = 16;

// same number in the generic and x86_64 tables
const SYS_CLONE3: u32 = 435;

#[cfg(target_arch = "x86_64")]
mod arch {
    pub const AUDIT_ARCH: Option<u32> = Some(0xc000_003e);
    /// x32 calls reach the same table with this bit set
    pub const X32_SYSCALL_BIT: Option<u32> = Some(0x4000_0000);
    pub const FORK_SYSCALLS: &[u32] = &[libc::SYS_fork as u32, libc::SYS_vfork as u32];
}

#[cfg(target_arch = "aarch64")]
mod arch {
    pub const AUDIT_ARCH: Option<u32> = Some(0xc000_00b7);
    pub const X32_SYSCALL_BIT: Option<u32> = None;
    pub const FORK_SYSCALLS: &[u32] = &[];
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod arch {
    pub const AUDIT_ARCH: Option<u32> = None;
    pub const X32_SYSCALL_BIT: Option<u32> = None;
    pub const FORK_SYSCALLS: &[u32] = &[];
}

/// Signal a filtered child dies from.
pub const VIOLATION_SIGNAL: i32 = libc::SIGSYS;

/// Compiled filter. Built in the parent so the child only installs it.
pub struct SpawnFilter {
    program: Vec<libc::sock_filter>,
}

impl SpawnFilter {
    /// Filter enforcing `policy`; `None` when nothing needs filtering.
    pub fn for_policy(policy: ProcessPolicy) -> Result<Option<Self>> {
        if !policy.is_restricted() {
            return Ok(None);
        }
        let audit_arch = arch::AUDIT_ARCH.ok_or_else(|| {
            RunguardError::Config(format!(
                "process policy '{}' is not supported on this architecture",
                policy
            ))
        })?;
        Ok(Some(Self {
            program: compile(policy, audit_arch),
        }))
    }

    pub fn len(&self) -> usize {
        self.program.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Attach the filter to the calling thread and everything it executes.
    ///
    /// Only two syscalls and no allocation, so it is usable after fork.
    pub fn install(&self) -> io::Result<()> {
        // SAFETY: prctl with integer arguments only.
        if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let prog = libc::sock_fprog {
            len: self.program.len() as libc::c_ushort,
            filter: self.program.as_ptr() as *mut libc::sock_filter,
        };
        // SAFETY: `prog` points into `self.program`, which outlives the call;
        // the kernel copies the program before returning.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_seccomp,
                SECCOMP_SET_MODE_FILTER,
                0 as libc::c_ulong,
                &prog as *const libc::sock_fprog,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn stmt(code: u16, k: u32) -> libc::sock_filter {
    libc::sock_filter { code, jt: 0, jf: 0, k }
}

fn jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

fn ret(action: u32) -> libc::sock_filter {
    stmt(BPF_RET | BPF_K, action)
}

/// `if nr == syscall { return action }`; expects nr in the accumulator.
fn reject(program: &mut Vec<libc::sock_filter>, syscall: u32, action: u32) {
    program.push(jump(BPF_JMP | BPF_JEQ | BPF_K, syscall, 0, 1));
    program.push(ret(action));
}

fn compile(policy: ProcessPolicy, audit_arch: u32) -> Vec<libc::sock_filter> {
    let kill = SECCOMP_RET_KILL_PROCESS;
    let mut program = vec![
        stmt(BPF_LD | BPF_W | BPF_ABS, DATA_ARCH),
        jump(BPF_JMP | BPF_JEQ | BPF_K, audit_arch, 1, 0),
        ret(kill),
        stmt(BPF_LD | BPF_W | BPF_ABS, DATA_NR),
    ];

    if let Some(bit) = arch::X32_SYSCALL_BIT {
        program.push(jump(BPF_JMP | BPF_JGE | BPF_K, bit, 0, 1));
        program.push(ret(kill));
    }

    for &syscall in arch::FORK_SYSCALLS {
        reject(&mut program, syscall, kill);
    }

    let clone = libc::SYS_clone as u32;
    match policy {
        ProcessPolicy::ThreadsOnly => {
            reject(&mut program, SYS_CLONE3, SECCOMP_RET_ERRNO | libc::ENOSYS as u32);
            // clone: allowed only with CLONE_THREAD in the flags (arg 0)
            program.push(jump(BPF_JMP | BPF_JEQ | BPF_K, clone, 0, 3));
            program.push(stmt(BPF_LD | BPF_W | BPF_ABS, DATA_ARG0_LOW));
            program.push(jump(BPF_JMP | BPF_JSET | BPF_K, libc::CLONE_THREAD as u32, 1, 0));
            program.push(ret(kill));
        }
        ProcessPolicy::Deny | ProcessPolicy::Allow => {
            reject(&mut program, SYS_CLONE3, kill);
            reject(&mut program, clone, kill);
        }
    }

    program.push(ret(SECCOMP_RET_ALLOW));
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs a filter the way the kernel would, for one syscall.
    fn evaluate(program: &[libc::sock_filter], arch: u32, nr: u32, arg0: u32) -> u32 {
        let mut acc = 0u32;
        let mut pc = 0usize;
        loop {
            let insn = program[pc];
            pc += 1;
            match insn.code {
                c if c == BPF_LD | BPF_W | BPF_ABS => {
                    acc = match insn.k {
                        DATA_NR => nr,
                        DATA_ARCH => arch,
                        DATA_ARG0_LOW => arg0,
                        other => panic!("unexpected load offset {}", other),
                    }
                }
                c if c == BPF_JMP | BPF_JEQ | BPF_K => {
                    pc += usize::from(if acc == insn.k { insn.jt } else { insn.jf });
                }
                c if c == BPF_JMP | BPF_JGE | BPF_K => {
                    pc += usize::from(if acc >= insn.k { insn.jt } else { insn.jf });
                }
                c if c == BPF_JMP | BPF_JSET | BPF_K => {
                    pc += usize::from(if acc & insn.k != 0 { insn.jt } else { insn.jf });
                }
                c if c == BPF_RET | BPF_K => return insn.k,
                other => panic!("unexpected opcode {:#x}", other),
            }
        }
    }

    fn filter(policy: ProcessPolicy) -> SpawnFilter {
        SpawnFilter::for_policy(policy).unwrap().unwrap()
    }

    fn native() -> u32 {
        arch::AUDIT_ARCH.unwrap()
    }

    const CLONE: u32 = libc::SYS_clone as u32;
    const THREAD_FLAGS: u32 = (libc::CLONE_VM | libc::CLONE_FS | libc::CLONE_FILES
        | libc::CLONE_SIGHAND | libc::CLONE_THREAD) as u32;
    const FORK_FLAGS: u32 = libc::SIGCHLD as u32;

    #[test]
    fn test_allow_needs_no_filter() {
        assert!(SpawnFilter::for_policy(ProcessPolicy::Allow).unwrap().is_none());
    }

    #[test]
    fn test_deny_kills_every_clone() {
        let deny = filter(ProcessPolicy::Deny);
        for flags in [THREAD_FLAGS, FORK_FLAGS, 0] {
            assert_eq!(evaluate(&deny.program, native(), CLONE, flags), SECCOMP_RET_KILL_PROCESS);
        }
        assert_eq!(evaluate(&deny.program, native(), SYS_CLONE3, 0), SECCOMP_RET_KILL_PROCESS);
        for &nr in arch::FORK_SYSCALLS {
            assert_eq!(evaluate(&deny.program, native(), nr, 0), SECCOMP_RET_KILL_PROCESS);
        }
    }

    #[test]
    fn test_other_syscalls_pass() {
        for policy in [ProcessPolicy::Deny, ProcessPolicy::ThreadsOnly] {
            let f = filter(policy);
            for nr in [libc::SYS_read, libc::SYS_write, libc::SYS_execve, libc::SYS_exit_group] {
                assert_eq!(evaluate(&f.program, native(), nr as u32, 0), SECCOMP_RET_ALLOW);
            }
        }
    }

    #[test]
    fn test_threads_only_allows_thread_clones() {
        let threads = filter(ProcessPolicy::ThreadsOnly);
        assert_eq!(evaluate(&threads.program, native(), CLONE, THREAD_FLAGS), SECCOMP_RET_ALLOW);
        assert_eq!(
            evaluate(&threads.program, native(), CLONE, FORK_FLAGS),
            SECCOMP_RET_KILL_PROCESS
        );
        let vfork_flags = (libc::CLONE_VM | libc::CLONE_VFORK | libc::SIGCHLD) as u32;
        assert_eq!(
            evaluate(&threads.program, native(), CLONE, vfork_flags),
            SECCOMP_RET_KILL_PROCESS
        );
        assert_eq!(
            evaluate(&threads.program, native(), SYS_CLONE3, 0),
            SECCOMP_RET_ERRNO | libc::ENOSYS as u32
        );
    }

    #[test]
    fn test_foreign_architecture_is_killed() {
        let deny = filter(ProcessPolicy::Deny);
        let foreign = native() ^ 0x1;
        assert_eq!(
            evaluate(&deny.program, foreign, libc::SYS_read as u32, 0),
            SECCOMP_RET_KILL_PROCESS
        );
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_x32_calls_are_killed() {
        let threads = filter(ProcessPolicy::ThreadsOnly);
        let x32_read = 0x4000_0000 | libc::SYS_read as u32;
        assert_eq!(evaluate(&threads.program, native(), x32_read, 0), SECCOMP_RET_KILL_PROCESS);
    }
}
