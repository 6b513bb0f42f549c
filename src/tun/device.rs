//! TUN/TAP device provisioning and teardown
//!
//! A [`TunDevice`] is created from a single [`TunConfig`]. Provisioning
//! validates the config, resolves the owner, opens `/dev/net/tun` and then
//! issues the control requests in order. The descriptor is an `OwnedFd`
//! from the moment it is opened, so any failing step closes the device
//! before the error reaches the caller.

use super::identity::{IdKind, IdResolver};
use super::ioctl::{self, IFNAMSIZ, TunFlags};
use crate::error::{Error, Result};
use crate::sys;
use nix::errno::Errno;
use nix::unistd::{getegid, geteuid};
use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;
use tracing::{debug, warn};

/// The tun/tap clone device
pub const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Longest interface name the kernel accepts
pub const MAX_NAME_LEN: usize = IFNAMSIZ - 1;

/// Interface layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunMode {
    /// Raw IP packets
    #[default]
    Tun,
    /// Ethernet frames
    Tap,
}

impl TunMode {
    fn flags(self) -> TunFlags {
        match self {
            TunMode::Tun => TunFlags::TUN,
            TunMode::Tap => TunFlags::TAP,
        }
    }
}

impl fmt::Display for TunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunMode::Tun => write!(f, "tun"),
            TunMode::Tap => write!(f, "tap"),
        }
    }
}

/// Requested interface owner, unresolved
///
/// Each side is a numeric id or a symbolic name. `None` stands for the
/// caller's effective uid or gid; the kernel's own default is no owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Owner {
    pub user: Option<String>,
    pub group: Option<String>,
}

/// Everything needed to provision one interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunConfig {
    /// Interface name; `None` or empty lets the kernel choose
    pub name: Option<String>,
    /// TUN or TAP
    pub mode: TunMode,
    /// Keep the 4-byte flags+protocol preamble on every frame
    pub header_framing: bool,
    /// Keep the interface after the descriptor is closed
    pub persistent: bool,
    /// Owner to assign after creation
    pub owner: Owner,
}

impl TunConfig {
    /// Create a TUN config with a kernel-assigned name
    pub fn new(mode: TunMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Request a specific interface name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Keep the flags+protocol preamble
    pub fn with_header_framing(mut self, enabled: bool) -> Self {
        self.header_framing = enabled;
        self
    }

    /// Make the interface outlive this process
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Assign ownership of the interface
    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    /// Flag word for TUNSETIFF
    pub fn flags(&self) -> TunFlags {
        let mut flags = self.mode.flags();
        if !self.header_framing {
            flags |= TunFlags::NO_PI;
        }
        flags
    }

    fn requested_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Check a requested interface name; empty is allowed
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong {
            name: name.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    if name.contains('\0') {
        return Err(Error::InvalidName(name.escape_default().to_string()));
    }
    Ok(())
}

/// An open TUN/TAP interface
#[derive(Debug)]
pub struct TunDevice {
    /// `None` once released
    fd: Option<OwnedFd>,
    name: String,
    mode: TunMode,
    header_framing: bool,
    persistent: bool,
    uid: u32,
    gid: u32,
}

impl TunDevice {
    /// Open and configure an interface through `/dev/net/tun`
    pub fn acquire(config: &TunConfig, resolver: &dyn IdResolver) -> Result<Self> {
        Self::acquire_at(Path::new(TUN_DEVICE_PATH), config, resolver)
    }

    /// Open and configure an interface through the clone device at `path`
    pub fn acquire_at(path: &Path, config: &TunConfig, resolver: &dyn IdResolver) -> Result<Self> {
        let requested = config.requested_name();
        validate_name(requested)?;

        // Resolve identities before anything is opened
        let uid = resolve(resolver, IdKind::User, config.owner.user.as_deref())?
            .unwrap_or_else(|| geteuid().as_raw());
        let gid = resolve(resolver, IdKind::Group, config.owner.group.as_deref())?
            .unwrap_or_else(|| getegid().as_raw());

        let fd: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::DeviceUnavailable {
                path: path.display().to_string(),
                errno: Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
            })?
            .into();

        let name = ioctl::set_iff(fd.as_fd(), requested, config.flags()).map_err(|errno| {
            Error::Rejected {
                name: requested.to_string(),
                errno,
            }
        })?;
        debug!(name = %name, mode = %config.mode, "attached interface");

        sys::set_nonblocking(fd.as_fd()).map_err(Error::NonBlocking)?;

        if config.persistent {
            ioctl::set_persist(fd.as_fd(), true).map_err(|errno| Error::Persistence {
                name: name.clone(),
                errno,
            })?;
            debug!(name = %name, "interface marked persistent");
        }

        ioctl::set_owner(fd.as_fd(), uid).map_err(|errno| Error::Ownership {
            name: name.clone(),
            kind: IdKind::User,
            id: uid,
            errno,
        })?;
        ioctl::set_group(fd.as_fd(), gid).map_err(|errno| Error::Ownership {
            name: name.clone(),
            kind: IdKind::Group,
            id: gid,
            errno,
        })?;
        debug!(name = %name, uid, gid, "interface owner set");

        Ok(Self {
            fd: Some(fd),
            name,
            mode: config.mode,
            header_framing: config.header_framing,
            persistent: config.persistent,
            uid,
            gid,
        })
    }

    /// Interface name as confirmed by the kernel
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TunMode {
        self.mode
    }

    pub fn header_framing(&self) -> bool {
        self.header_framing
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Assigned (uid, gid)
    pub fn owner(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    /// Borrow the device descriptor
    pub fn fd(&self) -> Result<BorrowedFd<'_>> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_fd())
            .ok_or(Error::AlreadyReleased)
    }

    /// Close the device descriptor
    ///
    /// A persistent interface stays in the networking stack; otherwise the
    /// kernel removes it on last close. Calling this twice is an error.
    pub fn release(&mut self) -> Result<()> {
        let fd = self.fd.take().ok_or(Error::AlreadyReleased)?;
        sys::close(fd).map_err(Error::Close)?;
        debug!(name = %self.name, persistent = self.persistent, "released interface");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_fd(fd: OwnedFd, name: &str) -> Self {
        Self {
            fd: Some(fd),
            name: name.to_string(),
            mode: TunMode::Tun,
            header_framing: false,
            persistent: false,
            uid: 0,
            gid: 0,
        }
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        if self.fd.take().is_some() {
            warn!(name = %self.name, "interface dropped without release, closing");
        }
    }
}

fn resolve(resolver: &dyn IdResolver, kind: IdKind, spec: Option<&str>) -> Result<Option<u32>> {
    spec.map(|spec| {
        resolver
            .resolve(kind, spec)
            .map_err(|errno| Error::UnknownIdentity {
                kind,
                spec: spec.to_string(),
                errno,
            })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tun::SystemIdentity;
    use nix::unistd::pipe;
    use std::cell::Cell;

    /// Resolver that knows one user and one group and counts lookups
    struct FixedResolver {
        calls: Cell<usize>,
    }

    impl FixedResolver {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl IdResolver for FixedResolver {
        fn resolve(&self, kind: IdKind, spec: &str) -> std::result::Result<u32, Errno> {
            self.calls.set(self.calls.get() + 1);
            match (kind, spec) {
                (IdKind::User, "alice") => Ok(1001),
                (IdKind::Group, "netdev") => Ok(108),
                _ => Err(Errno::EINVAL),
            }
        }
    }

    #[test]
    fn test_flags_for_modes() {
        let tun = TunConfig::new(TunMode::Tun);
        assert_eq!(tun.flags(), TunFlags::TUN | TunFlags::NO_PI);

        let tap = TunConfig::new(TunMode::Tap).with_header_framing(true);
        assert_eq!(tap.flags(), TunFlags::TAP);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("").is_ok());
        assert!(validate_name("tun0").is_ok());
        assert!(validate_name(&"x".repeat(15)).is_ok());
        assert!(matches!(
            validate_name(&"x".repeat(16)),
            Err(Error::NameTooLong { max: 15, .. })
        ));
        assert!(matches!(validate_name("tun\0"), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_long_name_rejected_before_open() {
        let config = TunConfig::new(TunMode::Tun).with_name("x".repeat(16));
        // A path that cannot be opened proves the device was never touched
        let err = TunDevice::acquire_at(
            Path::new("/nonexistent/net/tun"),
            &config,
            &SystemIdentity,
        )
        .unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.errno(), Errno::ENAMETOOLONG);
    }

    #[test]
    fn test_unknown_owner_rejected_before_open() {
        let resolver = FixedResolver::new();
        let config = TunConfig::new(TunMode::Tun).with_owner(Owner {
            user: Some("alice".to_string()),
            group: Some("wheel".to_string()),
        });
        let err = TunDevice::acquire_at(Path::new("/nonexistent/net/tun"), &config, &resolver)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownIdentity {
                kind: IdKind::Group,
                ..
            }
        ));
        assert_eq!(resolver.calls.get(), 2);
    }

    #[test]
    fn test_missing_device() {
        let resolver = FixedResolver::new();
        let config = TunConfig::new(TunMode::Tun).with_owner(Owner {
            user: Some("alice".to_string()),
            group: Some("netdev".to_string()),
        });
        let err = TunDevice::acquire_at(Path::new("/nonexistent/net/tun"), &config, &resolver)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable { .. }));
        assert_eq!(err.errno(), Errno::ENOENT);
    }

    #[test]
    fn test_rejected_request() {
        let config = TunConfig::new(TunMode::Tun).with_name("tun0");
        let err = TunDevice::acquire_at(Path::new("/dev/null"), &config, &SystemIdentity)
            .unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
        assert_eq!(err.errno(), Errno::ENOTTY);
    }

    #[test]
    fn test_release_at_most_once() {
        let (rx, _tx) = pipe().unwrap();
        let mut device = TunDevice::from_fd(rx, "tun9");
        assert!(device.fd().is_ok());

        device.release().unwrap();
        assert!(matches!(device.fd(), Err(Error::AlreadyReleased)));
        assert!(matches!(device.release(), Err(Error::AlreadyReleased)));
    }

    #[test]
    #[ignore] // Requires /dev/net/tun and CAP_NET_ADMIN
    fn test_acquire_kernel_assigned_tun() {
        let config = TunConfig::new(TunMode::Tun);
        let mut device = TunDevice::acquire(&config, &SystemIdentity).unwrap();

        let name = device.name().to_string();
        assert!(name.len() <= MAX_NAME_LEN);
        let suffix = name.strip_prefix("tun").unwrap();
        assert!(!suffix.is_empty());
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));

        let flags = sys::status_flags(device.fd().unwrap()).unwrap();
        assert!(flags.contains(nix::fcntl::OFlag::O_NONBLOCK));

        device.release().unwrap();
        // Non-persistent: gone after last close
        assert!(!Path::new("/sys/class/net").join(&name).exists());
    }

    /// Read one attribute of an interface from sysfs
    fn sysfs_attr(name: &str, attr: &str) -> String {
        std::fs::read_to_string(Path::new("/sys/class/net").join(name).join(attr))
            .unwrap()
            .trim()
            .to_string()
    }

    /// Drop the persistent flag of a leftover interface so the kernel removes it
    fn remove_persistent(name: &str) {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TUN_DEVICE_PATH)
            .unwrap();
        ioctl::set_iff(file.as_fd(), name, TunFlags::TUN | TunFlags::NO_PI).unwrap();
        ioctl::set_persist(file.as_fd(), false).unwrap();
    }

    #[test]
    #[ignore] // Requires /dev/net/tun and CAP_NET_ADMIN
    fn test_default_owner_is_effective_identity() {
        let config = TunConfig::new(TunMode::Tun)
            .with_name("tuncatown0")
            .with_persistent(true);
        let mut device = TunDevice::acquire(&config, &SystemIdentity).unwrap();
        let euid = geteuid().as_raw();
        let egid = getegid().as_raw();
        assert_eq!(device.owner(), (euid, egid));
        device.release().unwrap();

        let owner = sysfs_attr("tuncatown0", "owner");
        let group = sysfs_attr("tuncatown0", "group");
        remove_persistent("tuncatown0");
        assert_eq!(owner, euid.to_string());
        assert_eq!(group, egid.to_string());
    }

    #[test]
    #[ignore] // Requires /dev/net/tun and CAP_NET_ADMIN
    fn test_persistent_interface_keeps_explicit_owner() {
        let config = TunConfig::new(TunMode::Tun)
            .with_name("tuncatkeep0")
            .with_persistent(true)
            .with_owner(Owner {
                user: Some("65534".to_string()),
                group: Some("65533".to_string()),
            });
        let mut device = TunDevice::acquire(&config, &SystemIdentity).unwrap();
        assert!(device.persistent());
        device.release().unwrap();

        // Survives the last close
        let exists = Path::new("/sys/class/net/tuncatkeep0").exists();
        let owner = sysfs_attr("tuncatkeep0", "owner");
        let group = sysfs_attr("tuncatkeep0", "group");
        remove_persistent("tuncatkeep0");

        assert!(exists);
        assert_eq!(owner, "65534");
        assert_eq!(group, "65533");
        assert!(!Path::new("/sys/class/net/tuncatkeep0").exists());
    }

    #[test]
    #[ignore] // Requires /dev/net/tun and CAP_NET_ADMIN
    fn test_acquire_named_tap() {
        let config = TunConfig::new(TunMode::Tap).with_name("tuncattest0");
        let mut device = TunDevice::acquire(&config, &SystemIdentity).unwrap();
        assert_eq!(device.name(), "tuncattest0");
        assert_eq!(device.mode(), TunMode::Tap);
        device.release().unwrap();
    }
}
