use crate::health::ComponentHealth;
use crate::metrics::Metrics;
use broker_core::config::Config;
use broker_core::context::SystemContext;
use broker_core::relay::RelayClient;
use broker_core::state::StateStore;
use std::sync::Arc;

/// Shared services available to plugins during init and runtime.
#[derive(Clone)]
pub struct PluginContext {
    /// System context (hostname, platform, broker home, version).
    pub system: Arc<SystemContext>,
    /// Resolved configuration.
    pub config: Arc<Config>,
    /// Shared in-memory/on-disk state store (spec §2, §3).
    pub state: Arc<StateStore>,
    /// Relay HTTP client.
    pub relay: Arc<dyn RelayClient>,
    /// Process-local counters, rendered by the Metrics Writer.
    pub metrics: Arc<Metrics>,
    /// Shared per-component health, read by the Status Writer.
    pub health: Arc<ComponentHealth>,
}

impl PluginContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        system: Arc<SystemContext>,
        config: Arc<Config>,
        state: Arc<StateStore>,
        relay: Arc<dyn RelayClient>,
        metrics: Arc<Metrics>,
        health: Arc<ComponentHealth>,
    ) -> Self {
        Self {
            system,
            config,
            state,
            relay,
            metrics,
            health,
        }
    }
}
