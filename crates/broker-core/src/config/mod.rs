//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables (`BROKER_*`)
//! 3. Repo-local config (`.broker.toml`, walked up to a `.git` root)
//! 4. Global config (`~/.config/agent-broker/config.toml`)
//! 5. Defaults

mod discovery;
mod types;

pub use discovery::{resolve_config, resolve_settings, ConfigError, ConfigOverrides};
pub use types::{
    AgentConfig, Config, CoordinatorConfig, GcConfig, InjectionConfig, LogConfig, MessageConfig,
    MetricsConfig, RateLimitConfig, RelayConfig, SessionConfig,
};
