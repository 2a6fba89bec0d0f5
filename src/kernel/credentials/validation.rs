//! Credential switch validation.

use super::resolve::RunAs;
use crate::config::types::{Result, RunguardError};

/// Check that the supervisor, running with `current_euid`, may start the
/// child as `target`. Staying the same user is always allowed; anything
/// else needs root.
pub fn validate_switch(target: &RunAs, current_euid: u32) -> Result<()> {
    if target.uid == current_euid {
        return Ok(());
    }
    if current_euid != 0 {
        return Err(RunguardError::Config(format!(
            "running as user '{}' requires root (current euid {})",
            target.name, current_euid
        )));
    }
    if target.uid == 0 || target.gid == 0 {
        log::warn!(
            "Child will run with root credentials (uid={}, gid={})",
            target.uid,
            target.gid
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(uid: u32, gid: u32) -> RunAs {
        RunAs {
            name: format!("u{}", uid),
            uid,
            gid,
        }
    }

    #[test]
    fn validate_same_user_without_root() {
        assert!(validate_switch(&user(1000, 1000), 1000).is_ok());
    }

    #[test]
    fn validate_other_user_requires_root() {
        assert!(validate_switch(&user(1001, 1001), 1000).is_err());
        assert!(validate_switch(&user(1001, 1001), 0).is_ok());
    }

    #[test]
    fn validate_root_target_from_root() {
        assert!(validate_switch(&user(0, 0), 0).is_ok());
    }
}
