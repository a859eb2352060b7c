//! Daemon orchestration: init every plugin, run each on its own task until
//! cancellation, then hand them to [`graceful_shutdown`] (spec §5
//! "Cancellation and shutdown").

use super::shutdown::graceful_shutdown;
use crate::plugin::{PluginContext, PluginMetadata, PluginRegistry};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs every registered plugin to completion.
///
/// Each plugin's `run()` owns its task exclusively (no `Arc<Mutex<_>>`
/// sharing, see `daemon::shutdown`); once `cancel` fires, every plugin's
/// `run()` loop is expected to return promptly, at which point its task
/// hands the plugin back by value for `shutdown()`.
pub async fn run(
    mut registry: PluginRegistry,
    ctx: &PluginContext,
    cancel: CancellationToken,
    shutdown_grace: Duration,
) -> anyhow::Result<()> {
    registry.init_all(ctx).await?;
    let plugins = registry.into_plugins();
    info!("initialized {} plugin(s)", plugins.len());

    let mut handles = Vec::with_capacity(plugins.len());
    for (metadata, mut plugin) in plugins {
        let task_cancel = cancel.clone();
        let name = metadata.name;
        let handle = tokio::spawn(async move {
            if let Err(e) = plugin.run(task_cancel).await {
                error!(plugin = name, error = %e, "plugin run() returned an error");
            }
            (metadata, plugin)
        });
        handles.push(handle);
    }

    cancel.cancelled().await;
    info!("shutdown signal received, waiting up to {shutdown_grace:?} for plugins to stop");

    let mut finished: Vec<(PluginMetadata, Box<dyn crate::plugin::ErasedPlugin>)> = Vec::with_capacity(handles.len());
    for handle in handles {
        match tokio::time::timeout(shutdown_grace, handle).await {
            Ok(Ok(pair)) => finished.push(pair),
            Ok(Err(e)) => warn!(error = %e, "plugin task panicked"),
            Err(_) => warn!("a plugin did not stop within the shutdown grace period; skipping its shutdown()"),
        }
    }

    graceful_shutdown(finished, shutdown_grace).await
}
