use crate::config::types::{Result, RunguardError};
use nix::unistd::User;

/// Credentials the child will run under
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAs {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Look up a user by name, or by numeric uid when `name` is all digits.
pub fn resolve_user(name: &str) -> Result<RunAs> {
    let lookup = match name.parse::<u32>() {
        Ok(uid) => User::from_uid(nix::unistd::Uid::from_raw(uid)),
        Err(_) => User::from_name(name),
    };

    match lookup {
        Ok(Some(user)) => Ok(RunAs {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }),
        Ok(None) => Err(RunguardError::Config(format!("unknown user '{}'", name))),
        Err(e) => Err(RunguardError::Config(format!(
            "failed to look up user '{}': {}",
            name, e
        ))),
    }
}
