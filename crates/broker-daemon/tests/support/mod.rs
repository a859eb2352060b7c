//! Shared test scaffolding for the integration tests in this crate.
#![allow(dead_code)]

use broker_core::config::Config;
use broker_core::context::{Platform, SystemContext};
use broker_core::relay::{RelayClient, RelayError, SessionInfo};
use broker_core::state::StateStore;
use broker_daemon::health::ComponentHealth;
use broker_daemon::metrics::Metrics;
use broker_daemon::plugin::PluginContext;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A `RelayClient` that never reports any sessions and never succeeds an
/// injection; enough for tests whose plugins never touch the relay.
pub struct NullRelayClient;

impl RelayClient for NullRelayClient {
    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SessionInfo>, RelayError>> + Send + '_>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn inject(&self, _session_id: &str, _text: &str) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        Box::pin(async { Err(RelayError::Unavailable("no relay configured in this test".to_string())) })
    }
}

/// A `RelayClient` backed by in-memory state, recording every injection and
/// optionally flapping `inject()` a fixed number of times before succeeding.
pub struct MockRelayClient {
    sessions: Mutex<Vec<SessionInfo>>,
    injected: Mutex<Vec<(String, String)>>,
    inject_failures_remaining: AtomicUsize,
}

impl MockRelayClient {
    pub fn new(sessions: Vec<SessionInfo>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            injected: Mutex::new(Vec::new()),
            inject_failures_remaining: AtomicUsize::new(0),
        }
    }

    pub fn set_sessions(&self, sessions: Vec<SessionInfo>) {
        *self.sessions.lock().unwrap() = sessions;
    }

    pub fn injected(&self) -> Vec<(String, String)> {
        self.injected.lock().unwrap().clone()
    }
}

impl RelayClient for MockRelayClient {
    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SessionInfo>, RelayError>> + Send + '_>> {
        let sessions = self.sessions.lock().unwrap().clone();
        Box::pin(async move { Ok(sessions) })
    }

    fn inject(&self, session_id: &str, text: &str) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let session_id = session_id.to_string();
        let text = text.to_string();
        Box::pin(async move {
            self.injected.lock().unwrap().push((session_id, text));
            if self.inject_failures_remaining.load(Ordering::SeqCst) > 0 {
                self.inject_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(RelayError::Unavailable("mock relay flapping".to_string()));
            }
            Ok(())
        })
    }
}

pub fn session_info(id: &str) -> SessionInfo {
    SessionInfo {
        id: id.to_string(),
        title: Some(format!("{id}-title")),
        directory: Some("/tmp/project".to_string()),
        time: None,
    }
}

/// Build a `PluginContext` over a fresh broker home under `home`, with a
/// relay that never reports sessions. Good enough for plugins that never
/// touch `ctx.relay` (the daemon orchestration tests' mock plugins).
pub fn test_context(home: &std::path::Path) -> PluginContext {
    test_context_with(home, Config::default(), Arc::new(NullRelayClient))
}

pub fn test_context_with(home: &std::path::Path, config: Config, relay: Arc<dyn RelayClient>) -> PluginContext {
    std::fs::create_dir_all(home.join("messages/archive")).unwrap();
    std::fs::create_dir_all(home.join("agents")).unwrap();
    std::fs::create_dir_all(home.join("threads")).unwrap();
    std::fs::create_dir_all(home.join("daemon")).unwrap();

    let system = Arc::new(SystemContext::new(
        "test-host".to_string(),
        Platform::Linux,
        home.to_path_buf(),
        "0.1.0".to_string(),
    ));
    let state = Arc::new(StateStore::empty(home.to_path_buf()));
    PluginContext::new(system, Arc::new(config), state, relay, Arc::new(Metrics::new()), Arc::new(ComponentHealth::new()))
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}
