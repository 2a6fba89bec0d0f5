//! Target user resolution for the child.
//!
//! The uid/gid switch itself happens in the child between fork and exec
//! (group first, then user); this module only decides what to switch to.

mod resolve;
mod validation;

pub use resolve::{resolve_user, RunAs};
pub use validation::validate_switch;
