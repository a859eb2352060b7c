//! `broker start` - run the daemon in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use std::process::Command;

/// Run the broker daemon in the foreground
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Path to a config file, overriding the normal resolution order
    #[arg(long)]
    pub config: Option<String>,
}

/// Execute the start command by exec'ing the `brokerd` binary found on PATH.
///
/// `broker` is a thin front-end; the daemon's actual component wiring lives
/// in the `brokerd` binary so that it can also be invoked directly (e.g. by
/// a systemd unit, see `service::execute_install`).
pub fn execute(args: StartArgs) -> Result<()> {
    let mut cmd = Command::new("brokerd");
    if let Some(config) = args.config {
        cmd.arg("--config").arg(config);
    }

    let status = cmd
        .status()
        .context("Failed to launch brokerd (is it on PATH?)")?;

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
