//! Execution control
//!
//! Turns a validated `SupervisorConfig` into a running child process.

pub mod launcher;
