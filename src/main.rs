//! tuncat - bridge a TUN/TAP interface to stdin/stdout
//!
//! Creates (or attaches to) a virtual network interface and forwards raw
//! frames between it and the standard streams, so pipes, ssh or socat can
//! carry the interface's traffic.

mod cli;
mod error;
mod logging;
mod relay;
mod signal;
mod sys;
mod tun;

use cli::Cli;
use error::Result;
use relay::{Outcome, Session};
use signal::CancellationToken;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tun::{SystemIdentity, TunDevice};

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Some(shell) = cli.completions {
        Cli::generate_completion(shell);
        return ExitCode::SUCCESS;
    }

    logging::init(cli.verbose);

    match run(&cli) {
        Ok(outcome) => {
            debug!(?outcome, "forwarding finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(errno = %e.errno(), config = e.is_config(), "{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<Outcome> {
    let settings = cli.settings()?;

    let token = CancellationToken::new()?;
    signal::install(&token)?;

    let mut device = TunDevice::acquire(&settings.tun, &SystemIdentity)?;
    info!("Listening on {}", device.name());
    let (uid, gid) = device.owner();
    debug!(
        mode = %device.mode(),
        header_framing = device.header_framing(),
        persistent = device.persistent(),
        uid,
        gid,
        "interface ready"
    );

    let forwarded = forward(&device, settings.buffer, &token);
    let released = device.release();

    match (forwarded, released) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!(error = %close, "failed to release {}", device.name());
            Err(e)
        }
    }
}

fn forward(device: &TunDevice, capacity: NonZeroUsize, token: &CancellationToken) -> Result<Outcome> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let session = Session::new(device.fd()?, stdin.as_fd(), stdout.as_fd(), capacity);
    relay::run(&session, token)
}
