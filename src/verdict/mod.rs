//! Verdict construction
//!
//! Derives the single terminal record of a run as a pure function of the
//! engine's final state.

pub mod verdict;
