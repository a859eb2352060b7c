//! Error types for command execution

use thiserror::Error;

/// Command execution errors
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum CommandError {
    /// Daemon status snapshot missing or unreadable
    #[error("No daemon status found at {path}. Is the daemon running?")]
    StatusNotFound { path: String },

    /// brokerd could not be launched
    #[error("Failed to launch brokerd: {0}")]
    LaunchFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
