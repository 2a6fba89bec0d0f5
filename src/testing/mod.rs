//! Testing infrastructure
//!
//! Deterministic stand-ins for the clock and the supervised process, so
//! engine scenarios run without spawning or sleeping.

pub mod fake_process;
pub mod manual_clock;

// Re-export commonly used items
pub use fake_process::*;
pub use manual_clock::*;
