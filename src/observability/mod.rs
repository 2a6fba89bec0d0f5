//! Observability
//!
//! Human summary, statistics record and per-tick trace of a run.

pub mod report;
pub mod stats;
