//! System context

use super::Platform;
use std::path::PathBuf;

/// System context resolved at startup and shared with every plugin.
#[derive(Debug, Clone)]
pub struct SystemContext {
    /// System hostname
    pub hostname: String,
    /// Operating system platform
    pub platform: Platform,
    /// Broker home (state) directory, see `crate::home::get_home_dir`
    pub broker_home: PathBuf,
    /// Broker version string (`CARGO_PKG_VERSION` of the daemon binary)
    pub broker_version: String,
}

impl SystemContext {
    /// Create a new SystemContext with all fields populated.
    pub fn new(
        hostname: String,
        platform: Platform,
        broker_home: PathBuf,
        broker_version: String,
    ) -> Self {
        Self {
            hostname,
            platform,
            broker_home,
            broker_version,
        }
    }
}
