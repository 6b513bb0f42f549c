//! Unified error types for tuncat

use crate::relay::Endpoint;
use crate::tun::IdKind;
use nix::errno::Errno;
use thiserror::Error;

/// Main error type for tuncat operations
///
/// Every variant maps to an OS error code through [`Error::errno`], which
/// becomes the process exit status.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid interface name '{0}'")]
    InvalidName(String),

    #[error("Interface name too long: {name} (max {max} bytes)")]
    NameTooLong { name: String, max: usize },

    #[error("Failed to resolve {kind} '{spec}': {errno}")]
    UnknownIdentity {
        kind: IdKind,
        spec: String,
        errno: Errno,
    },

    // Provisioning errors
    #[error("Could not open tun/tap module interface {path}: {errno}")]
    DeviceUnavailable { path: String, errno: Errno },

    #[error("Cannot communicate with tun/tap module (TUNSETIFF '{name}'): {errno}")]
    Rejected { name: String, errno: Errno },

    #[error("Unable to make tun fd non-blocking: {0}")]
    NonBlocking(Errno),

    #[error("Unable to make {name} persistent: {errno}")]
    Persistence { name: String, errno: Errno },

    #[error("Unable to set {kind} of {name} to {id}: {errno}")]
    Ownership {
        name: String,
        kind: IdKind,
        id: u32,
        errno: Errno,
    },

    // Runtime errors
    #[error("Failed to create wake pipe: {0}")]
    WakePipe(Errno),

    #[error("Failed to install handler for {signal}: {errno}")]
    Signal { signal: &'static str, errno: Errno },

    #[error("Signal handlers are already installed")]
    SignalInstalled,

    #[error("Unable to configure {endpoint}: {errno}")]
    Stdio { endpoint: Endpoint, errno: Errno },

    #[error("poll() failed: {0}")]
    Poll(Errno),

    #[error("Read from {endpoint} failed: {errno}")]
    Read { endpoint: Endpoint, errno: Errno },

    #[error("Write to {endpoint} failed: {errno}")]
    Write { endpoint: Endpoint, errno: Errno },

    // Teardown errors
    #[error("close() failed: {0}")]
    Close(Errno),

    #[error("Interface handle already released")]
    AlreadyReleased,
}

impl Error {
    /// The OS error code carried by (or assigned to) this error
    pub fn errno(&self) -> Errno {
        match self {
            Error::InvalidName(_) => Errno::EINVAL,
            Error::NameTooLong { .. } => Errno::ENAMETOOLONG,
            Error::UnknownIdentity { errno, .. } => *errno,
            Error::DeviceUnavailable { errno, .. } => *errno,
            Error::Rejected { errno, .. } => *errno,
            Error::NonBlocking(errno) => *errno,
            Error::Persistence { errno, .. } => *errno,
            Error::Ownership { errno, .. } => *errno,
            Error::WakePipe(errno) => *errno,
            Error::Signal { errno, .. } => *errno,
            Error::SignalInstalled => Errno::EBUSY,
            Error::Stdio { errno, .. } => *errno,
            Error::Poll(errno) => *errno,
            Error::Read { errno, .. } => *errno,
            Error::Write { errno, .. } => *errno,
            Error::Close(errno) => *errno,
            Error::AlreadyReleased => Errno::EBADF,
        }
    }

    /// Whether this error was caused by invalid user input rather than the OS
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidName(_) | Error::NameTooLong { .. } | Error::UnknownIdentity { .. }
        )
    }

    /// Process exit status for this error
    ///
    /// The errno is used directly when it fits in a byte; anything else
    /// collapses to 1 so a failure never reads as success.
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.errno() as i32)
            .ok()
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }
}

/// Result type alias for tuncat operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_is_errno() {
        let err = Error::NameTooLong {
            name: "averyveryverylongname".to_string(),
            max: 15,
        };
        assert_eq!(err.exit_code(), libc::ENAMETOOLONG as u8);

        let err = Error::Write {
            endpoint: Endpoint::Output,
            errno: Errno::EPIPE,
        };
        assert_eq!(err.exit_code(), libc::EPIPE as u8);
    }

    #[test]
    fn test_exit_code_never_zero() {
        let err = Error::Poll(Errno::UnknownErrno);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_config_errors() {
        assert!(Error::InvalidName(String::new()).is_config());
        assert!(
            Error::UnknownIdentity {
                kind: IdKind::Group,
                spec: "nogroup-here".to_string(),
                errno: Errno::EINVAL,
            }
            .is_config()
        );
        assert!(!Error::NonBlocking(Errno::EBADF).is_config());
        assert!(!Error::AlreadyReleased.is_config());
    }

    #[test]
    fn test_display_names_operation() {
        let err = Error::Read {
            endpoint: Endpoint::Device,
            errno: Errno::EIO,
        };
        let msg = err.to_string();
        assert!(msg.contains("tun device"));
        assert!(msg.contains("EIO"));
    }
}
