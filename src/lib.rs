//! runguard: run a program under wall-time, memory and idleness limits
//! Samples the child from `/proc` on a fixed tick, kills it when a limit is
//! crossed and reports exactly one verdict per run
//!
//! # Architecture
//!
//! ## Supervision Core ([`core`])
//! - [`core::supervisor`]: Enforcement engine (poll loop and state machine)
//! - [`core::load`]: CPU load classification between two samples
//! - [`core::types`]: Samples, run state, phases and the process capability
//! - [`core::cancel`]: Cancellation token for the inter-tick sleep
//! - [`core::clock`]: Time source seam
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::procfs`]: `/proc` readers (CPU time, working set, per-CPU load)
//! - [`kernel::process`]: Real child process with group kill
//! - [`kernel::affinity`]: Least-loaded CPU selection and core counting
//! - [`kernel::credentials`]: Target user resolution
//! - [`kernel::signal`]: Shutdown signals bridged to cancellation
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launcher`]: Working directory, streams, user, affinity, spawn
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: Outcome classification and exit codes
//!
//! ## Observability ([`observability`])
//! - [`observability::report`]: Human summary line
//! - [`observability::stats`]: JSON statistics record and CSV trace
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error type, limits and run configuration
//! - [`config::units`]: Time, memory and load value parsing
//! - [`config::validator`]: Cross-field checks before launch
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::manual_clock`]: Clock that moves only when told to
//! - [`testing::fake_process`]: Scripted process for engine scenarios
//!
//! # Design Principles
//!
//! 1. **Kernel as truth** - Usage comes from `/proc`, exit status from wait
//! 2. **One verdict per run** - Every path out of the engine yields a `Verdict`
//! 3. **No orphans** - A killed or abandoned child takes its process group along
//! 4. **Minimal unsafe** - Thin wrappers with explicit preconditions

// Configuration
pub mod config;

// Supervision core
pub mod core;

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the runguard binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use core::supervisor::{EngineOptions, EnforcementEngine, TickObserver, TickReport};
pub use verdict::verdict::{Outcome, Verdict};
