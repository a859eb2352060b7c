//! Configuration discovery and resolution

use super::types::Config;
use crate::schema::HostSettings;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration not found
    #[error("Configuration not found")]
    NotFound,
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Override relay port
    pub relay_port: Option<u16>,
    /// Override log level
    pub log_level: Option<String>,
    /// Path to config file override
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources.
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables (`BROKER_*`)
/// 3. Repo-local config (`.broker.toml`, walked up to a `.git` root)
/// 4. Global config (`~/.config/agent-broker/config.toml`)
/// 5. Defaults
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Some(path) = &overrides.config_path {
        if let Ok(file_config) = load_config_file(path) {
            merge_config(&mut config, file_config);
        } else {
            eprintln!("Warning: Failed to parse config override at {path:?}");
        }
    } else {
        let global_config_path = home_dir.join(".config/agent-broker/config.toml");
        if global_config_path.exists() {
            if let Ok(file_config) = load_config_file(&global_config_path) {
                merge_config(&mut config, file_config);
            } else {
                eprintln!("Warning: Failed to parse global config at {global_config_path:?}");
            }
        }

        if let Some(repo_config) = find_repo_local_config(current_dir) {
            if let Ok(file_config) = load_config_file(&repo_config) {
                merge_config(&mut config, file_config);
            } else {
                eprintln!("Warning: Failed to parse repo config at {repo_config:?}");
            }
        }
    }

    apply_env_overrides(&mut config);
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Find repo-local config file.
///
/// Searches the current directory and its parents, stopping at a `.git` root.
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(".broker.toml");
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

/// Load config from a TOML file
fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Merge a file-sourced config into the base, section by section.
fn merge_config(base: &mut Config, file: Config) {
    base.relay = file.relay;
    base.session = file.session;
    base.injection = file.injection;
    base.message = file.message;
    base.agent = file.agent;
    base.gc = file.gc;
    base.rate_limit = file.rate_limit;
    base.coordinator = file.coordinator;
    base.metrics = file.metrics;
    base.log = file.log;
}

/// Apply environment variable overrides (`BROKER_*`)
fn apply_env_overrides(config: &mut Config) {
    if let Ok(host) = std::env::var("BROKER_RELAY_HOST") {
        config.relay.host = host;
    }
    if let Some(port) = env_parsed::<u16>("BROKER_RELAY_PORT") {
        config.relay.port = port;
    }
    if let Some(v) = env_parsed::<u64>("BROKER_SESSION_POLL_SECONDS") {
        config.session.poll_seconds = v;
    }
    if let Some(v) = env_parsed::<usize>("BROKER_INJECTION_WORKERS") {
        config.injection.workers = v;
    }
    if let Some(v) = env_parsed::<u32>("BROKER_INJECTION_RETRIES") {
        config.injection.retries = v;
    }
    if let Some(v) = env_parsed::<u64>("BROKER_MESSAGE_TTL_SECONDS") {
        config.message.ttl_seconds = v;
    }
    if let Some(v) = env_parsed::<u64>("BROKER_AGENT_STALE_SECONDS") {
        config.agent.stale_seconds = v;
    }
    if let Some(v) = env_parsed::<u64>("BROKER_GC_INTERVAL_SECONDS") {
        config.gc.interval_seconds = v;
    }
    if let Ok(v) = std::env::var("BROKER_RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = v != "0" && !v.eq_ignore_ascii_case("false");
    }
    if let Ok(level) = std::env::var("BROKER_LOG") {
        config.log.level = level;
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(port) = overrides.relay_port {
        config.relay.port = port;
    }
    if let Some(ref level) = overrides.log_level {
        config.log.level = level.clone();
    }
}

/// Resolve Claude Code host settings used for the agent-hub MCP preflight.
///
/// Precedence (highest to lowest):
/// 1. CLI-provided path override
/// 2. `.claude/settings.local.json` (repo-local)
/// 3. `.claude/settings.json` (repo-local)
/// 4. `~/.claude/settings.json` (global)
///
/// Returns `None` if no settings file is found or parsing fails; a warning
/// is logged but resolution continues to the next source.
pub fn resolve_settings(
    settings_path_override: Option<&Path>,
    current_dir: &Path,
    home_dir: &Path,
) -> Option<HostSettings> {
    if let Some(path) = settings_path_override {
        if let Some(settings) = try_load_settings(path) {
            return Some(settings);
        }
    }

    let local_path = current_dir.join(".claude/settings.local.json");
    if let Some(settings) = try_load_settings(&local_path) {
        return Some(settings);
    }

    let repo_path = current_dir.join(".claude/settings.json");
    if let Some(settings) = try_load_settings(&repo_path) {
        return Some(settings);
    }

    let global_path = home_dir.join(".claude/settings.json");
    if let Some(settings) = try_load_settings(&global_path) {
        return Some(settings);
    }

    None
}

fn try_load_settings(path: &Path) -> Option<HostSettings> {
    if !path.exists() {
        return None;
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => Some(settings),
            Err(e) => {
                eprintln!("Warning: Failed to parse settings at {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            eprintln!("Warning: Failed to read settings at {path:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        for key in [
            "BROKER_RELAY_HOST",
            "BROKER_RELAY_PORT",
            "BROKER_SESSION_POLL_SECONDS",
            "BROKER_INJECTION_WORKERS",
            "BROKER_INJECTION_RETRIES",
            "BROKER_MESSAGE_TTL_SECONDS",
            "BROKER_AGENT_STALE_SECONDS",
            "BROKER_GC_INTERVAL_SECONDS",
            "BROKER_RATE_LIMIT_ENABLED",
            "BROKER_LOG",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();
        let temp_dir = std::env::temp_dir();
        let overrides = ConfigOverrides::default();

        let config = resolve_config(&overrides, &temp_dir, &temp_dir).unwrap();

        assert_eq!(config.relay.port, 4096);
        assert_eq!(config.session.poll_seconds, 5);
        assert_eq!(config.injection.workers, 4);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let temp_dir = std::env::temp_dir();
        let overrides = ConfigOverrides::default();

        unsafe {
            env::set_var("BROKER_RELAY_PORT", "6000");
            env::set_var("BROKER_INJECTION_WORKERS", "8");
        }

        let config = resolve_config(&overrides, &temp_dir, &temp_dir).unwrap();

        assert_eq!(config.relay.port, 6000);
        assert_eq!(config.injection.workers, 8);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_cli_overrides() {
        clear_env();
        let temp_dir = std::env::temp_dir();
        let overrides = ConfigOverrides {
            relay_port: Some(7000),
            log_level: Some("debug".to_string()),
            config_path: None,
        };

        let config = resolve_config(&overrides, &temp_dir, &temp_dir).unwrap();

        assert_eq!(config.relay.port, 7000);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    #[serial]
    fn test_rate_limit_disabled_env() {
        clear_env();
        let temp_dir = std::env::temp_dir();
        let overrides = ConfigOverrides::default();

        unsafe {
            env::set_var("BROKER_RATE_LIMIT_ENABLED", "false");
        }

        let config = resolve_config(&overrides, &temp_dir, &temp_dir).unwrap();
        assert!(!config.rate_limit.enabled);

        clear_env();
    }

    #[test]
    fn test_settings_resolution_none() {
        let temp_dir = std::env::temp_dir();
        let nonexistent = temp_dir.join("nonexistent-broker-test-dir");

        let settings = resolve_settings(None, &nonexistent, &nonexistent);
        assert!(settings.is_none());
    }

    #[test]
    fn test_config_file_parse() {
        let temp_dir = std::env::temp_dir();
        let config_path = temp_dir.join("test-broker-config.toml");

        let toml_content = r#"
[relay]
host = "127.0.0.1"
port = 9000

[injection]
workers = 2
retries = 5
timeout_ms = 1000
        "#;

        std::fs::write(&config_path, toml_content).unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.injection.workers, 2);
        assert_eq!(config.injection.retries, 5);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_malformed_config_handled_gracefully() {
        let temp_dir = std::env::temp_dir();
        let config_path = temp_dir.join("malformed-broker-config.toml");

        std::fs::write(&config_path, "invalid toml [[[").unwrap();

        let result = load_config_file(&config_path);
        assert!(result.is_err());

        std::fs::remove_file(&config_path).ok();
    }
}
