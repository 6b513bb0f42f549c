//! Linux tun/tap ioctl requests
//!
//! Native wrappers for the `/dev/net/tun` control requests from
//! `<linux/if_tun.h>`.

use bitflags::bitflags;
use nix::errno::Errno;
use nix::sys::ioctl::ioctl_num_type;
use std::os::fd::{AsRawFd, BorrowedFd};

/// Interface name buffer size, including the trailing NUL
pub const IFNAMSIZ: usize = libc::IFNAMSIZ;

/// TUNSETIFF: `_IOW('T', 202, int)`; the argument is really a `struct ifreq`
pub const TUNSETIFF: ioctl_num_type =
    nix::request_code_write!(b'T', 202, std::mem::size_of::<libc::c_int>());

bitflags! {
    /// Flag word passed in `ifr_flags` with TUNSETIFF
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TunFlags: libc::c_short {
        /// Layer 3 device, raw IP packets
        const TUN = 0x0001;
        /// Layer 2 device, Ethernet frames
        const TAP = 0x0002;
        /// Omit the 4-byte flags+protocol preamble
        const NO_PI = 0x1000;
    }
}

/// The part of `struct ifreq` TUNSETIFF reads and writes
///
/// Padded to the full 40-byte `struct ifreq` so the kernel's copy stays
/// inside our buffer.
#[repr(C)]
pub struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

impl IfReq {
    /// Build a request for `name` (empty asks the kernel to pick one)
    pub fn new(name: &str, flags: TunFlags) -> Result<Self, Errno> {
        let mut req = IfReq {
            ifr_name: [0; IFNAMSIZ],
            ifr_flags: flags.bits(),
            _padding: [0; 22],
        };
        copy_ifname(&mut req.ifr_name, name)?;
        Ok(req)
    }

    /// Interface name as currently stored in the request
    pub fn name(&self) -> String {
        let len = self
            .ifr_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(IFNAMSIZ);
        let bytes: Vec<u8> = self.ifr_name[..len].iter().map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Copy an interface name into a fixed-size, NUL-terminated buffer
fn copy_ifname(dest: &mut [libc::c_char; IFNAMSIZ], name: &str) -> Result<(), Errno> {
    let bytes = name.as_bytes();
    if bytes.contains(&0) {
        return Err(Errno::EINVAL);
    }
    if bytes.len() >= IFNAMSIZ {
        return Err(Errno::ENAMETOOLONG);
    }
    for (slot, &b) in dest.iter_mut().zip(bytes) {
        *slot = b as libc::c_char;
    }
    Ok(())
}

nix::ioctl_readwrite_bad!(tun_set_iff, TUNSETIFF, IfReq);
nix::ioctl_write_int!(tun_set_persist, b'T', 203);
nix::ioctl_write_int!(tun_set_owner, b'T', 204);
nix::ioctl_write_int!(tun_set_group, b'T', 206);

/// Create or attach to an interface; returns the name the kernel settled on
pub fn set_iff(fd: BorrowedFd<'_>, name: &str, flags: TunFlags) -> Result<String, Errno> {
    let mut req = IfReq::new(name, flags)?;
    unsafe { tun_set_iff(fd.as_raw_fd(), &mut req) }?;
    Ok(req.name())
}

/// Mark the attached interface persistent (or not)
pub fn set_persist(fd: BorrowedFd<'_>, persistent: bool) -> Result<(), Errno> {
    unsafe { tun_set_persist(fd.as_raw_fd(), persistent as _) }?;
    Ok(())
}

/// Set the owning user of the attached interface
pub fn set_owner(fd: BorrowedFd<'_>, uid: u32) -> Result<(), Errno> {
    unsafe { tun_set_owner(fd.as_raw_fd(), uid as _) }?;
    Ok(())
}

/// Set the owning group of the attached interface
pub fn set_group(fd: BorrowedFd<'_>, gid: u32) -> Result<(), Errno> {
    unsafe { tun_set_group(fd.as_raw_fd(), gid as _) }?;
    Ok(())
}
