//! Broker home directory resolution, delegated to `broker_core::home`.

use anyhow::Result;
use std::path::PathBuf;

/// Directory holding daemon state (`daemon/status.json`, `daemon/broker.sock`, ...).
///
/// Respects `BROKER_HOME` the same way the daemon does, via the shared
/// canonical resolver in `broker-core`.
pub fn broker_home_dir() -> Result<PathBuf> {
    broker_core::home::get_home_dir()
}
