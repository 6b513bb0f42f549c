//! TUN/TAP interface management
//!
//! Provides:
//! - Interface creation through `/dev/net/tun`
//! - Persistence and ownership control
//! - User/group resolution for ownership

pub mod device;
pub mod identity;
pub mod ioctl;

pub use device::{Owner, TunConfig, TunDevice, TunMode};
pub use identity::{IdKind, IdResolver, SystemIdentity};
