//! broker - CLI front-end for the agent-broker daemon.
//!
//! A thin wrapper around the daemon's on-disk status snapshot and
//! service-unit text generation; the daemon itself is started with
//! `broker start` (or `brokerd` directly) and does all the real work.

use clap::Parser;

mod commands;
mod util;

use commands::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
