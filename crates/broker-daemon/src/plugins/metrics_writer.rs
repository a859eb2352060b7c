//! Metrics Writer (spec §4.10).
//!
//! Renders the process-local [`crate::metrics::Metrics`] counters to a
//! Prometheus text file on `metrics.interval_seconds`, matching the Status
//! Writer's push-based model (§4.11) rather than serving metrics directly.

use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use broker_core::io::write_atomic;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const COMPONENT: &str = "metrics_writer";

pub struct MetricsWriterPlugin {
    ctx: Option<PluginContext>,
}

impl MetricsWriterPlugin {
    pub fn new() -> Self {
        Self { ctx: None }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx
            .as_ref()
            .expect("MetricsWriterPlugin::init must run before run()")
    }

    fn write(&self) {
        let ctx = self.ctx();
        let path = ctx.state.home().join("metrics.prom");
        let rendered = ctx.metrics.render();
        if let Err(e) = write_atomic(&path, rendered.as_bytes()) {
            warn!(error = %e, "failed to write metrics exposition file");
            ctx.health.report_error(COMPONENT, e.to_string());
        } else {
            ctx.health.report_running(COMPONENT);
        }
    }
}

impl Default for MetricsWriterPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for MetricsWriterPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "metrics_writer",
            version: env!("CARGO_PKG_VERSION"),
            description: "Writes a Prometheus text exposition file of broker counters",
            capabilities: vec![Capability::Metrics],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        let interval_secs = self.ctx().config.metrics.interval_seconds.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        self.write();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => self.write(),
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        self.write();
        Ok(())
    }
}
