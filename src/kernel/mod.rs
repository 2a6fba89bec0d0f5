//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: procfs -> affinity -> process; credentials,
//! seccomp and signal stand alone.

pub mod affinity;
pub mod credentials;
pub mod procfs;
pub mod process;
pub mod seccomp;
pub mod signal;
