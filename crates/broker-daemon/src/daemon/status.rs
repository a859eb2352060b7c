//! Daemon status file writer (spec §4.11).
//!
//! Writes `{BROKER_HOME}/daemon/status.json` for `broker status` to read.
//! The shape here must match `broker-cli`'s `status` command exactly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Daemon status snapshot written to `status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub timestamp: String,
    pub pid: u32,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentStatus>,
    pub known_sessions: usize,
    pub known_agents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub status: ComponentStatusKind,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatusKind {
    Running,
    Error,
    Disabled,
}

/// Periodically writes [`DaemonStatus`] atomically (spec §4.11).
pub struct StatusWriter {
    status_path: PathBuf,
    start_time: SystemTime,
    version: String,
}

impl StatusWriter {
    /// `home_dir` is the broker home (`BROKER_HOME`), not `.claude` — the
    /// status file lives at `{home_dir}/daemon/status.json`.
    pub fn new(home_dir: PathBuf, version: String) -> Self {
        let status_path = home_dir.join("daemon").join("status.json");
        Self {
            status_path,
            start_time: SystemTime::now(),
            version,
        }
    }

    pub fn write_status(
        &self,
        components: Vec<ComponentStatus>,
        known_sessions: usize,
        known_agents: usize,
    ) -> Result<()> {
        if let Some(parent) = self.status_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create daemon status directory")?;
        }

        let uptime_secs = self.start_time.elapsed().unwrap_or(Duration::ZERO).as_secs();

        let status = DaemonStatus {
            timestamp: format_timestamp(SystemTime::now()),
            pid: std::process::id(),
            version: self.version.clone(),
            uptime_secs,
            components,
            known_sessions,
            known_agents,
        };

        let json = serde_json::to_string_pretty(&status).context("failed to serialize daemon status")?;

        broker_core::io::write_atomic(&self.status_path, json.as_bytes())
            .context("failed to write status.json atomically")?;

        Ok(())
    }

    pub fn status_path(&self) -> &PathBuf {
        &self.status_path
    }
}

fn format_timestamp(time: SystemTime) -> String {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    use chrono::{DateTime, Utc};
    let dt = DateTime::<Utc>::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
        .unwrap_or_else(Utc::now);
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
