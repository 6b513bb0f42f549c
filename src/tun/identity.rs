//! User and group resolution for interface ownership

use nix::errno::Errno;
use nix::unistd::{Group, User};
use std::fmt;
use std::num::IntErrorKind;

/// Which identity database a spec refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Group,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::User => write!(f, "user"),
            IdKind::Group => write!(f, "group"),
        }
    }
}

/// Maps a user/group spec (numeric id or symbolic name) to a numeric id
pub trait IdResolver {
    fn resolve(&self, kind: IdKind, spec: &str) -> Result<u32, Errno>;
}

/// Resolver backed by the system passwd/group databases
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdResolver for SystemIdentity {
    fn resolve(&self, kind: IdKind, spec: &str) -> Result<u32, Errno> {
        if let Some(id) = parse_numeric_id(spec) {
            return id;
        }

        let id = match kind {
            IdKind::User => User::from_name(spec)?.map(|u| u.uid.as_raw()),
            IdKind::Group => Group::from_name(spec)?.map(|g| g.gid.as_raw()),
        };
        id.ok_or(Errno::EINVAL)
    }
}

/// Interpret `spec` as a literal id
///
/// Returns `None` when the spec is not a number at all, so the caller can
/// fall back to a name lookup. `u32::MAX` is `(uid_t)-1`, which means
/// "unset", and is rejected along with negative and oversized values.
pub fn parse_numeric_id(spec: &str) -> Option<Result<u32, Errno>> {
    match spec.parse::<i64>() {
        Ok(n) if (0..i64::from(u32::MAX)).contains(&n) => Some(Ok(n as u32)),
        Ok(_) => Some(Err(Errno::ERANGE)),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            Some(Err(Errno::ERANGE))
        }
        Err(_) => None,
    }
}
