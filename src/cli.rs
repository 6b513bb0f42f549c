//! Command-line interface for tuncat
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::error::{Error, Result};
use crate::relay::DEFAULT_BUFFER_LEN;
use crate::tun::device::validate_name;
use crate::tun::{Owner, TunConfig, TunMode};
use clap::{ArgAction, CommandFactory, Parser};
use clap_complete::Shell;
use std::num::NonZeroUsize;

/// tuncat - bridge a TUN/TAP interface to stdin/stdout
#[derive(Parser, Debug)]
#[command(name = "tuncat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Use a (possibly existing) tun interface
    #[arg(short, long, value_name = "tunX", env = "TUNCAT_INTERFACE")]
    pub interface: Option<String>,

    /// Add ethernet headers (tap instead of tun)
    #[arg(short, long)]
    pub ethernet: bool,

    /// Add flags+protocol preamble (2x2 bytes)
    #[arg(short, long)]
    pub flags: bool,

    /// Keep the device after program exit
    #[arg(short, long)]
    pub permanent: bool,

    /// Set the device owner (default is euid)
    #[arg(short, long, value_name = "ID|NAME")]
    pub user: Option<String>,

    /// Set the device group (default is egid)
    #[arg(short, long, value_name = "ID|NAME")]
    pub group: Option<String>,

    /// Override the default buffer size in bytes
    #[arg(short, long, value_name = "BYTES", env = "TUNCAT_BUFFER", default_value_t = DEFAULT_BUFFER_LEN)]
    pub buffer: NonZeroUsize,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

/// Validated run settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Interface to provision
    pub tun: TunConfig,
    /// Per-direction buffer capacity
    pub buffer: NonZeroUsize,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "tuncat", &mut std::io::stdout());
    }

    /// Turn parsed flags into settings, rejecting bad values
    pub fn settings(&self) -> Result<Settings> {
        if let Some(name) = &self.interface {
            if name.is_empty() {
                return Err(Error::InvalidName(name.clone()));
            }
            validate_name(name)?;
        }

        let mode = if self.ethernet {
            TunMode::Tap
        } else {
            TunMode::Tun
        };

        let mut tun = TunConfig::new(mode)
            .with_header_framing(self.flags)
            .with_persistent(self.permanent)
            .with_owner(Owner {
                user: self.user.clone(),
                group: self.group.clone(),
            });
        if let Some(name) = &self.interface {
            tun = tun.with_name(name.clone());
        }

        Ok(Settings {
            tun,
            buffer: self.buffer,
        })
    }
}
