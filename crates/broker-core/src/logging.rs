//! Shared logging initialization for broker binaries.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

fn parse_level() -> tracing::Level {
    match std::env::var("BROKER_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `BROKER_LOG`, falling back to
/// the resolved config's `[log] level` when the env var is unset (callers
/// pass the resolved level explicitly via `init_with_level`).
///
/// Safe to call multiple times; only the first call initializes the
/// subscriber. Intentionally best-effort and never returns an error.
pub fn init() {
    init_with_level(parse_level());
}

/// Initialize tracing at an explicit level, used once the config's
/// `[log] level` has been resolved (env var still wins if set).
pub fn init_with_level(default_level: tracing::Level) {
    if INIT.get().is_some() {
        return;
    }
    let level = if std::env::var("BROKER_LOG").is_ok() {
        parse_level()
    } else {
        default_level
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}
