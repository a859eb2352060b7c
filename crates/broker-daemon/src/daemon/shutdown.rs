//! Graceful shutdown coordination for plugins (spec §5 "Shutdown Sequence").
//!
//! Each plugin runs on its own task and is moved into that task by
//! `tokio::spawn`, so no `Arc<Mutex<_>>` is needed to share it: once the
//! task's `run()` future returns (because its `CancellationToken` fired), the
//! task hands the plugin back by value and this module calls `shutdown()` on
//! it directly.

use crate::plugin::{ErasedPlugin, PluginMetadata};
use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Shut down every plugin that has already stopped running, with a per-plugin
/// timeout. A plugin that exceeds the timeout is logged as a warning and
/// shutdown continues for the rest.
pub async fn graceful_shutdown(
    plugins: Vec<(PluginMetadata, Box<dyn ErasedPlugin>)>,
    shutdown_timeout: Duration,
) -> Result<()> {
    info!(
        "beginning graceful shutdown of {} plugin(s) (timeout: {:?})",
        plugins.len(),
        shutdown_timeout
    );

    let mut success_count = 0;
    let mut timeout_count = 0;
    let mut error_count = 0;

    for (metadata, mut plugin) in plugins {
        let plugin_name = metadata.name;
        info!("shutting down plugin: {plugin_name}");

        match timeout(shutdown_timeout, plugin.shutdown()).await {
            Ok(Ok(())) => {
                info!("plugin {plugin_name} shut down cleanly");
                success_count += 1;
            }
            Ok(Err(e)) => {
                error!("plugin {plugin_name} shutdown failed: {e}");
                error_count += 1;
            }
            Err(_) => {
                warn!("plugin {plugin_name} shutdown timed out after {shutdown_timeout:?}");
                timeout_count += 1;
            }
        }
    }

    info!(
        "graceful shutdown complete: {success_count} success, {timeout_count} timeout, {error_count} error"
    );

    if error_count > 0 {
        anyhow::bail!("{error_count} plugin(s) failed to shut down cleanly");
    }

    Ok(())
}
