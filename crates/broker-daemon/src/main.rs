//! `brokerd` — the local agent broker daemon (spec §1, §2).
//!
//! Resolves configuration and system context, runs the MCP preflight check,
//! ensures the relay is reachable, then registers and runs every plugin
//! until a shutdown signal arrives.

use anyhow::{Context, Result};
use broker_core::config::{resolve_config, resolve_settings, ConfigOverrides};
use broker_core::context::{Platform, SystemContext};
use broker_core::relay::{ensure_relay_running, HttpRelayClient, RelayClient};
use broker_core::state::StateStore;
use broker_daemon::health::ComponentHealth;
use broker_daemon::metrics::Metrics;
use broker_daemon::plugin::{PluginContext, PluginRegistry};
use broker_daemon::{daemon, plugins};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const REQUIRED_MCP_SERVER: &str = "agent-hub";

/// Background daemon for the local agent broker.
#[derive(Parser, Debug)]
#[command(name = "brokerd")]
#[command(about = "Background daemon for the local agent broker")]
#[command(version)]
struct Args {
    /// Path to a config file, overriding the normal discovery precedence.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(code) = e.downcast_ref::<StartupFailure>() {
                error!("{}", code.message);
                ExitCode::from(code.exit_code)
            } else {
                error!("{e:#}");
                ExitCode::FAILURE
            }
        }
    }
}

/// A startup failure with a specific exit code (spec §6: "Exit codes").
#[derive(Debug)]
struct StartupFailure {
    exit_code: u8,
    message: String,
}

impl std::fmt::Display for StartupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StartupFailure {}

async fn run(args: Args) -> Result<()> {
    broker_core::logging::init();
    info!("agent broker daemon starting");

    let home_dir = broker_core::home::get_home_dir().context("failed to determine broker home directory")?;
    std::fs::create_dir_all(&home_dir).context("failed to create broker home directory")?;
    std::fs::create_dir_all(home_dir.join("messages/archive"))
        .context("failed to create spool directories")?;
    std::fs::create_dir_all(home_dir.join("agents")).context("failed to create agents directory")?;
    std::fs::create_dir_all(home_dir.join("threads")).context("failed to create threads directory")?;
    std::fs::create_dir_all(home_dir.join("daemon")).context("failed to create daemon directory")?;

    // Hold an exclusive lock for the lifetime of the process so a second
    // `brokerd` invocation against the same home directory fails fast
    // instead of racing this one for the spool and state files.
    let _instance_lock = broker_core::io::acquire_lock(&home_dir.join("daemon/daemon.lock"), 0)
        .map_err(|_| StartupFailure {
            exit_code: 1,
            message: format!(
                "another broker daemon instance already holds the lock at {:?}; is one already running?",
                home_dir.join("daemon/daemon.lock")
            ),
        })?;

    let current_dir = std::env::current_dir().context("failed to get current directory")?;

    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        ..Default::default()
    };
    let config = resolve_config(&overrides, &current_dir, &home_dir).context("failed to resolve configuration")?;

    // Preflight: the agent-hub MCP must be configured on the relay host
    // (spec §6 "Preflight"). Missing it is fatal with exit code 2.
    let settings = resolve_settings(None, &current_dir, &home_dir);
    let mcp_present = settings.map(|s| s.has_mcp_server(REQUIRED_MCP_SERVER)).unwrap_or(false);
    if !mcp_present {
        return Err(StartupFailure {
            exit_code: 2,
            message: format!(
                "the `{REQUIRED_MCP_SERVER}` MCP server is not configured in any `.claude/settings.json`; \
                 add it before starting the broker daemon"
            ),
        }
        .into());
    }

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let system = Arc::new(SystemContext::new(
        hostname,
        Platform::detect(),
        home_dir.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    ));

    let relay: Arc<dyn RelayClient> = Arc::new(HttpRelayClient::new(
        &config.relay.host,
        config.relay.port,
        Duration::from_millis(config.injection.timeout_ms),
    ));

    ensure_relay_running(relay.as_ref(), None, Duration::from_secs(30))
        .await
        .map_err(|e| StartupFailure {
            exit_code: 3,
            message: format!("relay at {}:{} is unreachable: {e}", config.relay.host, config.relay.port),
        })?;

    let state = Arc::new(
        StateStore::load(home_dir.clone())
            .await
            .context("failed to load broker state store")?,
    );
    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(ComponentHealth::new());
    let config = Arc::new(config);

    let ctx = PluginContext::new(system, Arc::clone(&config), state, relay, metrics, health);

    let mut registry = PluginRegistry::new();
    registry.register(plugins::SessionPlugin::new());
    registry.register(plugins::MessagePipelinePlugin::new());
    registry.register(plugins::GcPlugin::new());
    if config.coordinator.enabled {
        registry.register(plugins::CoordinatorPlugin::new());
    }
    registry.register(plugins::MetricsWriterPlugin::new());
    registry.register(plugins::StatusWriterPlugin::new());
    registry.register(plugins::SocketPlugin::new());
    info!("registered {} plugin(s)", registry.len());

    let cancel = CancellationToken::new();
    let cancel_for_signals = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("failed to listen for Ctrl+C");
            info!("received Ctrl+C");
        }

        cancel_for_signals.cancel();
    });

    let shutdown_grace = Duration::from_millis(config.injection.timeout_ms) * config.injection.retries;
    daemon::run(registry, &ctx, cancel, shutdown_grace)
        .await
        .context("daemon event loop failed")?;

    info!("agent broker daemon shutdown complete");
    Ok(())
}
