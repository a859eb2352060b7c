//! CLI command dispatch and execution

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod error;
mod query;
mod service;
mod start;
mod status;

/// broker - local message-broker daemon for AI coding-assistant sessions
#[derive(Parser, Debug)]
#[command(
    name = "broker",
    version,
    about = "Local message-broker daemon for AI coding-assistant sessions",
    long_about = "Discovers agent sessions, watches a spool directory for messages, \
                  and injects them into the right session with retry and rate limiting."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the broker daemon in the foreground (default)
    Start(start::StartArgs),

    /// Show daemon status from the last status snapshot
    Status(status::StatusArgs),

    /// List agents known to the running daemon
    Agents(query::AgentsArgs),

    /// List sessions known to the running daemon
    Sessions(query::SessionsArgs),

    /// Show the status of a single message thread
    Thread(query::ThreadArgs),

    /// Print the systemd user-unit text and installation command
    InstallService,

    /// Print the command to remove a previously installed service unit
    UninstallService,
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command.unwrap_or(Commands::Start(start::StartArgs::default())) {
            Commands::Start(args) => start::execute(args),
            Commands::Status(args) => status::execute(args),
            Commands::Agents(args) => query::execute_agents(args),
            Commands::Sessions(args) => query::execute_sessions(args),
            Commands::Thread(args) => query::execute_thread(args),
            Commands::InstallService => service::execute_install(),
            Commands::UninstallService => service::execute_uninstall(),
        }
    }
}
