//! Supervision core.
//!
//! Owns the poll loop, its run state and the process capability it talks
//! through. Launching, OS queries and reporting live outside the core.

pub mod cancel;
pub mod clock;
pub mod load;
pub mod supervisor;
pub mod types;
