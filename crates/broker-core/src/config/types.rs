//! Configuration value types.

use serde::{Deserialize, Serialize};

/// Top-level broker configuration, resolved by [`super::resolve_config`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub session: SessionConfig,
    pub injection: InjectionConfig,
    pub message: MessageConfig,
    pub agent: AgentConfig,
    pub gc: GcConfig,
    pub rate_limit: RateLimitConfig,
    pub coordinator: CoordinatorConfig,
    pub metrics: MetricsConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            session: SessionConfig::default(),
            injection: InjectionConfig::default(),
            message: MessageConfig::default(),
            agent: AgentConfig::default(),
            gc: GcConfig::default(),
            rate_limit: RateLimitConfig::default(),
            coordinator: CoordinatorConfig::default(),
            metrics: MetricsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// `[relay]` - where the relay HTTP API is reachable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4096,
        }
    }
}

/// `[session]` - session discovery poll cadence and cache lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_seconds: u64,
    pub cache_ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 5,
            cache_ttl_seconds: 30,
        }
    }
}

/// `[injection]` - worker pool sizing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InjectionConfig {
    pub workers: usize,
    pub retries: u32,
    pub timeout_ms: u64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retries: 3,
            timeout_ms: 2_000,
        }
    }
}

/// `[message]` - message lifetime before it is treated as expired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageConfig {
    pub ttl_seconds: u64,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self { ttl_seconds: 3600 }
    }
}

/// `[agent]` - when an agent record is considered stale for GC purposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub stale_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stale_seconds: 86_400,
        }
    }
}

/// `[gc]` - garbage collector sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GcConfig {
    pub interval_seconds: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
        }
    }
}

/// `[rate_limit]` - per-sender sliding window and cooldown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_messages: usize,
    pub window_seconds: u64,
    pub cooldown_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: 20,
            window_seconds: 60,
            cooldown_seconds: 0,
        }
    }
}

/// `[coordinator]` - the optional coordinator orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub enabled: bool,
    pub model: String,
    pub directory: Option<String>,
    pub instructions_path: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "default".to_string(),
            directory: None,
            instructions_path: None,
        }
    }
}

/// `[metrics]` - metrics exposition file write cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 15,
        }
    }
}

/// `[log]` - log level, overridable by `BROKER_LOG`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
