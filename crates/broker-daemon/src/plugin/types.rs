//! Plugin identity, capability, and error types.

/// Plugin metadata — identity and capabilities.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub capabilities: Vec<Capability>,
}

/// What a plugin contributes to the broker pipeline (spec §2's component table).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Discovers sessions and assigns/persists agent identities.
    SessionDiscovery,
    /// Watches the spool and delivers messages to the relay.
    MessageDelivery,
    /// Prunes stale state and expired spool entries.
    GarbageCollection,
    /// Drives the coordinator session.
    Coordination,
    /// Writes the metrics exposition file.
    Metrics,
    /// Writes the daemon status snapshot.
    StatusReporting,
    /// Serves the read-only introspection socket.
    Introspection,
    Custom(String),
}

/// Plugin lifecycle state, tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Created,
    Initialized,
    Running,
    Stopped,
    Failed,
}

/// Plugin errors with structured variants.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin init failed: {message}")]
    Init {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("plugin runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("plugin shutdown failed: {message}")]
    Shutdown {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("plugin config error: {message}")]
    Config { message: String },
}

impl PluginError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }
}
