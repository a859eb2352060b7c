//! Status Writer (spec §4.11, ADDED).
//!
//! Writes `daemon/status.json` on an interval by reading the shared
//! [`crate::health::ComponentHealth`] snapshot every other plugin reports
//! into, plus the State Store's session/agent counts. This is the file
//! `broker status` reads, never talking to the daemon process directly.

use crate::daemon::status::{ComponentStatus, ComponentStatusKind, StatusWriter};
use crate::health::ComponentState;
use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct StatusWriterPlugin {
    ctx: Option<PluginContext>,
    writer: Option<StatusWriter>,
}

impl StatusWriterPlugin {
    pub fn new() -> Self {
        Self {
            ctx: None,
            writer: None,
        }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx
            .as_ref()
            .expect("StatusWriterPlugin::init must run before run()")
    }

    fn writer(&self) -> &StatusWriter {
        self.writer
            .as_ref()
            .expect("StatusWriterPlugin::init must run before run()")
    }

    async fn write(&self) {
        let ctx = self.ctx();
        let components = ctx
            .health
            .snapshot()
            .into_iter()
            .map(|(name, state)| {
                let (status, last_error) = match state {
                    ComponentState::Running => (ComponentStatusKind::Running, None),
                    ComponentState::Error(e) => (ComponentStatusKind::Error, Some(e)),
                    ComponentState::Disabled => (ComponentStatusKind::Disabled, None),
                };
                ComponentStatus {
                    name,
                    status,
                    last_error,
                }
            })
            .collect();

        let known_sessions = ctx.state.session_count().await;
        let known_agents = ctx.state.agent_count().await;

        if let Err(e) = self.writer().write_status(components, known_sessions, known_agents) {
            warn!(error = %e, "failed to write daemon status file");
        }
    }
}

impl Default for StatusWriterPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for StatusWriterPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "status_writer",
            version: env!("CARGO_PKG_VERSION"),
            description: "Writes a periodic snapshot of per-component health to daemon/status.json",
            capabilities: vec![Capability::StatusReporting],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.writer = Some(StatusWriter::new(
            ctx.system.broker_home.clone(),
            ctx.system.broker_version.clone(),
        ));
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        let interval_secs = self.ctx().config.metrics.interval_seconds.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        self.write().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => self.write().await,
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        self.write().await;
        Ok(())
    }
}
