//! Integration tests for individual plugins (spec §4.2-§4.12) driven through
//! their public `Plugin` trait surface only.

use broker_core::config::Config;
use broker_core::context::{Platform, SystemContext};
use broker_core::relay::{RelayClient, RelayError, SessionInfo};
use broker_core::schema::{Agent, Message, MessagePriority, MessageType, Session};
use broker_core::state::StateStore;
use broker_daemon::health::{ComponentHealth, ComponentState};
use broker_daemon::metrics::Metrics;
use broker_daemon::plugin::{Capability, Plugin, PluginContext, PluginRegistry, PluginState};
use broker_daemon::plugins::{
    CoordinatorPlugin, GcPlugin, MessagePipelinePlugin, MetricsWriterPlugin, SessionPlugin, SocketPlugin,
    StatusWriterPlugin,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test relay
// ============================================================================

/// A `RelayClient` backed by in-memory state, recording every injection and
/// optionally flapping `inject()` a fixed number of times before succeeding.
struct MockRelayClient {
    sessions: Mutex<Vec<SessionInfo>>,
    injected: Mutex<Vec<(String, String)>>,
    inject_failures_remaining: AtomicUsize,
}

impl MockRelayClient {
    fn new(sessions: Vec<SessionInfo>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            injected: Mutex::new(Vec::new()),
            inject_failures_remaining: AtomicUsize::new(0),
        }
    }

    fn with_inject_failures(sessions: Vec<SessionInfo>, failures: usize) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            injected: Mutex::new(Vec::new()),
            inject_failures_remaining: AtomicUsize::new(failures),
        }
    }

    fn injected(&self) -> Vec<(String, String)> {
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

fn session_info(id: &str) -> SessionInfo {
    SessionInfo {
        id: id.to_string(),
        title: Some(format!("{id}-title")),
        directory: Some("/tmp/project".to_string()),
        time: None,
    }
}

fn test_context(home: &std::path::Path, config: Config, relay: Arc<dyn RelayClient>) -> PluginContext {
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

fn write_message(dir: &std::path::Path, file_name: &str, message: &Message) {
    std::fs::write(dir.join(file_name), serde_json::to_vec(message).unwrap()).unwrap();
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

async fn run_briefly<P: Plugin>(mut plugin: P, cancel: CancellationToken) -> P {
    let cancel_for_task = cancel.clone();
    let handle = tokio::spawn(async move {
        plugin.run(cancel_for_task).await.unwrap();
        plugin
    });
    tokio::time::sleep(Duration::from_millis(80)).await;
    cancel.cancel();
    handle.await.unwrap()
}

async fn register_recipient(ctx: &PluginContext, agent_id: &str, session_id: &str) {
    ctx.state.put_agent(Agent::new(agent_id, session_id, now_ms())).await.unwrap();
    ctx.state.upsert_session(Session::new(session_id, None, None, now_ms())).await;
    // These tests drive the pipeline plugin directly, bypassing the session
    // plugin's registrar, so simulate an already-onboarded session by
    // marking it ready the same way `SessionPlugin::handle_new_session`
    // would once it finished orienting it.
    ctx.state.mark_ready(session_id).await;
}

// ============================================================================
// Registry lifecycle
// ============================================================================

#[tokio::test]
async fn registry_tracks_capabilities_across_the_full_plugin_set() {
    let dir = TempDir::new().unwrap();
    let relay: Arc<dyn RelayClient> = Arc::new(MockRelayClient::new(vec![]));
    let ctx = test_context(dir.path(), Config::default(), relay);

    let mut registry = PluginRegistry::new();
    registry.register(SessionPlugin::new());
    registry.register(MessagePipelinePlugin::new());
    registry.register(GcPlugin::new());
    registry.register(MetricsWriterPlugin::new());
    registry.register(StatusWriterPlugin::new());
    registry.register(SocketPlugin::new());
    assert_eq!(registry.len(), 6);

    registry.init_all(&ctx).await.unwrap();

    assert_eq!(registry.state_of("gc"), Some(PluginState::Initialized));
    assert_eq!(registry.get_by_capability(&Capability::GarbageCollection).len(), 1);
    assert_eq!(registry.get_by_capability(&Capability::MessageDelivery).len(), 1);
    assert!(registry.get_by_name("socket").is_some());
    assert!(registry.get_by_name("nonexistent").is_none());

    let plugins = registry.into_plugins();
    assert_eq!(plugins.len(), 6);
}

// ============================================================================
// Session Poller + Orientation & Agent Registrar (spec §4.2, §4.3)
// ============================================================================

#[tokio::test]
async fn session_plugin_registers_and_orients_a_new_session() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![session_info("s1")]));
    let mut config = Config::default();
    config.session.poll_seconds = 1;
    let ctx = test_context(dir.path(), config, relay.clone());

    let cancel = CancellationToken::new();
    let mut plugin = SessionPlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, cancel).await;

    let agent = ctx.state.get_agent("s1-title").await.expect("agent should be registered");
    assert_eq!(agent.session_id, "s1");
    assert!(ctx.state.is_oriented("s1").await);
    assert_eq!(ctx.state.agent_for_session("s1").await.as_deref(), Some("s1-title"));

    let injected = relay.injected();
    assert_eq!(injected.len(), 1);
    assert!(injected[0].1.contains("now connected to the agent broker"));
}

#[tokio::test]
async fn session_plugin_does_not_re_orient_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = {
        let mut c = Config::default();
        c.session.poll_seconds = 1;
        c
    };

    // First run: session appears, gets oriented, and the binding is persisted.
    {
        let relay = Arc::new(MockRelayClient::new(vec![session_info("s1")]));
        let ctx = test_context(dir.path(), config.clone(), relay.clone());
        let mut plugin = SessionPlugin::new();
        plugin.init(&ctx).await.unwrap();
        run_briefly(plugin, CancellationToken::new()).await;
        assert_eq!(relay.injected().len(), 1);
    }

    // Restart: a fresh StateStore reloaded from disk, a fresh SessionPlugin
    // with no `pre_existing` memory, same session still reported by the
    // relay. Orientation must not fire again (spec §3 Invariant 3/4).
    let reloaded_state = Arc::new(StateStore::load(dir.path().to_path_buf()).await.unwrap());
    assert!(reloaded_state.is_oriented("s1").await);
    assert_eq!(reloaded_state.agent_for_session("s1").await.as_deref(), Some("s1-title"));

    let relay = Arc::new(MockRelayClient::new(vec![session_info("s1")]));
    let system = Arc::new(SystemContext::new(
        "test-host".to_string(),
        Platform::Linux,
        dir.path().to_path_buf(),
        "0.1.0".to_string(),
    ));
    let ctx = PluginContext::new(
        system,
        Arc::new(config),
        reloaded_state,
        relay.clone(),
        Arc::new(Metrics::new()),
        Arc::new(ComponentHealth::new()),
    );
    let mut plugin = SessionPlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    assert!(relay.injected().is_empty(), "orientation must not repeat across a restart");
}

// ============================================================================
// Message Pipeline (spec §4.4-§4.7)
// ============================================================================

#[tokio::test]
async fn pipeline_delivers_a_message_to_a_known_recipient() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.injection.workers = 1;
    let ctx = test_context(dir.path(), config, relay.clone());
    register_recipient(&ctx, "bob", "s-bob").await;

    let message = Message {
        from: "alice".into(),
        to: "bob".into(),
        message_type: MessageType::Task,
        content: "ship the release".into(),
        priority: MessagePriority::Normal,
        thread_id: Some("t-1".into()),
        timestamp: now_ms(),
    };
    write_message(&ctx.state.home().join("messages"), "msg-1.json", &message);

    let mut plugin = MessagePipelinePlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    assert!(!ctx.state.home().join("messages/msg-1.json").exists());
    let archived = ctx.state.home().join("messages/archive/msg-1.json");
    assert!(archived.exists());
    let injected = relay.injected();
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].0, "s-bob");
    assert!(injected[0].1.contains("ship the release"));

    let thread = ctx.state.get_thread("t-1").await.expect("thread should be tracked");
    assert!(!thread.closed);
}

#[tokio::test]
async fn pipeline_archives_undeliverable_messages_for_unknown_recipients() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.injection.workers = 1;
    config.injection.retries = 1;
    config.injection.timeout_ms = 5;
    let ctx = test_context(dir.path(), config, relay);

    let message = Message {
        from: "alice".into(),
        to: "ghost".into(),
        message_type: MessageType::Task,
        content: "hello?".into(),
        priority: MessagePriority::Normal,
        thread_id: None,
        timestamp: now_ms(),
    };
    write_message(&ctx.state.home().join("messages"), "msg-1.json", &message);

    let mut plugin = MessagePipelinePlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    let archived_path = ctx.state.home().join("messages/archive/msg-1.json");
    assert!(archived_path.exists());
    let archived: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(archived_path).unwrap()).unwrap();
    assert_eq!(archived["undeliverable"], serde_json::json!(true));
    assert_eq!(
        ctx.metrics.messages_failed_undeliverable_total.load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn pipeline_retries_through_a_flapping_relay_then_delivers() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::with_inject_failures(vec![], 2));
    let mut config = Config::default();
    config.injection.workers = 1;
    config.injection.retries = 3;
    config.injection.timeout_ms = 5;
    let ctx = test_context(dir.path(), config, relay.clone());
    register_recipient(&ctx, "bob", "s-bob").await;

    let message = Message {
        from: "alice".into(),
        to: "bob".into(),
        message_type: MessageType::Task,
        content: "retry me".into(),
        priority: MessagePriority::Normal,
        thread_id: None,
        timestamp: now_ms(),
    };
    write_message(&ctx.state.home().join("messages"), "msg-1.json", &message);

    let mut plugin = MessagePipelinePlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    let archived_path = ctx.state.home().join("messages/archive/msg-1.json");
    assert!(archived_path.exists(), "message should eventually be delivered and archived clean");
    let archived: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(archived_path).unwrap()).unwrap();
    assert!(archived.get("injectFailed").is_none());
    assert!(ctx.metrics.injections_retried_total.load(Ordering::Relaxed) >= 2);
    assert_eq!(relay.injected().len(), 3);
}

#[tokio::test]
async fn pipeline_rate_limits_a_burst_from_one_sender() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.injection.workers = 1;
    config.rate_limit.enabled = true;
    config.rate_limit.max_messages = 1;
    config.rate_limit.window_seconds = 60;
    let ctx = test_context(dir.path(), config, relay);
    register_recipient(&ctx, "bob", "s-bob").await;

    let ts = now_ms();
    for i in 0..2 {
        let message = Message {
            from: "alice".into(),
            to: "bob".into(),
            message_type: MessageType::Task,
            content: format!("burst {i}"),
            priority: MessagePriority::Normal,
            thread_id: None,
            timestamp: ts,
        };
        write_message(&ctx.state.home().join("messages"), &format!("msg-{i}.json"), &message);
    }

    let mut plugin = MessagePipelinePlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    assert_eq!(ctx.metrics.messages_failed_rate_total.load(Ordering::Relaxed), 1);
    assert_eq!(ctx.metrics.messages_total.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn pipeline_closes_a_thread_on_resolved_completion() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.injection.workers = 1;
    let ctx = test_context(dir.path(), config, relay);
    register_recipient(&ctx, "bob", "s-bob").await;

    let message = Message {
        from: "alice".into(),
        to: "bob".into(),
        message_type: MessageType::Completion,
        content: "all done, RESOLVED".into(),
        priority: MessagePriority::Normal,
        thread_id: Some("t-9".into()),
        timestamp: now_ms(),
    };
    write_message(&ctx.state.home().join("messages"), "msg-1.json", &message);

    let mut plugin = MessagePipelinePlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    let thread = ctx.state.get_thread("t-9").await.expect("thread should exist");
    assert!(thread.closed);
}

// ============================================================================
// Garbage Collector (spec §4.8)
// ============================================================================

#[tokio::test]
async fn gc_plugin_prunes_stale_agents_expired_messages_and_old_threads() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.gc.interval_seconds = 1;
    config.agent.stale_seconds = 1;
    config.message.ttl_seconds = 1;
    let ctx = test_context(dir.path(), config, relay);

    // A stale agent record with no known session.
    let mut stale_agent = Agent::new("ghost", "", 0);
    stale_agent.last_seen_at = 0;
    ctx.state.put_agent(stale_agent).await.unwrap();

    // An orphaned session->agent binding whose session and agent are both gone.
    ctx.state.bind_session_agent("s-gone", "also-gone").await.unwrap();

    // A closed thread long past its TTL.
    let mut thread = broker_core::schema::Thread::new("t-old", "a", "b", 0);
    thread.closed = true;
    ctx.state.put_thread(thread).await.unwrap();

    // An expired spool message.
    let expired = Message {
        from: "alice".into(),
        to: "bob".into(),
        message_type: MessageType::Task,
        content: "old news".into(),
        priority: MessagePriority::Normal,
        thread_id: None,
        timestamp: 0,
    };
    write_message(&ctx.state.home().join("messages"), "old.json", &expired);

    let mut plugin = GcPlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    assert!(ctx.state.get_agent("ghost").await.is_none());
    assert!(ctx.state.agent_for_session("s-gone").await.is_none());
    assert!(ctx.state.get_thread("t-old").await.is_none());
    assert!(!ctx.state.home().join("messages/old.json").exists());
    assert!(ctx.state.home().join("messages/archive/old.json").exists());
    assert!(ctx.metrics.gc_runs_total.load(Ordering::Relaxed) >= 1);
}

#[tokio::test]
async fn gc_plugin_never_prunes_the_coordinator_agent() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.gc.interval_seconds = 1;
    config.agent.stale_seconds = 1;
    let ctx = test_context(dir.path(), config, relay);

    let mut coordinator = Agent::new(broker_core::schema::COORDINATOR_AGENT_ID, "", 0);
    coordinator.last_seen_at = 0;
    ctx.state.put_agent(coordinator).await.unwrap();

    let mut plugin = GcPlugin::new();
    plugin.init(&ctx).await.unwrap();
    run_briefly(plugin, CancellationToken::new()).await;

    assert!(ctx.state.get_agent(broker_core::schema::COORDINATOR_AGENT_ID).await.is_some());
}

// ============================================================================
// Metrics Writer + Status Writer (spec §4.10, §4.11)
// ============================================================================

#[tokio::test]
async fn metrics_writer_renders_counters_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let ctx = test_context(dir.path(), Config::default(), relay);
    ctx.metrics.messages_total.fetch_add(5, Ordering::Relaxed);

    let mut plugin = MetricsWriterPlugin::new();
    plugin.init(&ctx).await.unwrap();
    plugin.shutdown().await.unwrap();

    let rendered = std::fs::read_to_string(dir.path().join("metrics.prom")).unwrap();
    assert!(rendered.contains("broker_messages_total 5"));
}

#[tokio::test]
async fn status_writer_reflects_component_health_snapshot() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let ctx = test_context(dir.path(), Config::default(), relay);
    ctx.health.report_running("session");
    ctx.health.report_error("coordinator", "boom");
    ctx.health.report_disabled("socket");

    let mut plugin = StatusWriterPlugin::new();
    plugin.init(&ctx).await.unwrap();
    plugin.shutdown().await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("daemon/status.json")).unwrap();
    let status: serde_json::Value = serde_json::from_str(&contents).unwrap();
    let components = status["components"].as_array().unwrap();
    assert_eq!(components.len(), 3);
    assert!(matches!(ctx.health.snapshot()["coordinator"], ComponentState::Error(_)));
}

// ============================================================================
// Coordinator Orchestrator (spec §4.9)
// ============================================================================

#[tokio::test]
async fn coordinator_plugin_reports_disabled_when_not_configured() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let mut config = Config::default();
    config.coordinator.enabled = false;
    let ctx = test_context(dir.path(), config, relay);

    let mut plugin = CoordinatorPlugin::new();
    plugin.init(&ctx).await.unwrap();
    plugin.run(CancellationToken::new()).await.unwrap();

    assert_eq!(ctx.health.snapshot()["coordinator"], ComponentState::Disabled);
    assert!(ctx.state.get_agent(broker_core::schema::COORDINATOR_AGENT_ID).await.is_none());
}

// ============================================================================
// Unix Socket Server (spec §4.12)
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn socket_plugin_serves_list_agents_over_the_unix_socket() {
    use broker_core::daemon_client::{SocketRequest, SocketResponse};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let dir = TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![]));
    let ctx = test_context(dir.path(), Config::default(), relay);
    ctx.state.put_agent(Agent::new("alice", "s1", now_ms())).await.unwrap();

    let cancel = CancellationToken::new();
    let mut plugin = SocketPlugin::new();
    plugin.init(&ctx).await.unwrap();
    let cancel_for_task = cancel.clone();
    let handle = tokio::spawn(async move { plugin.run(cancel_for_task).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let socket_path = dir.path().join("daemon/broker.sock");
    let stream = UnixStream::connect(&socket_path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let request = SocketRequest {
        version: broker_core::daemon_client::PROTOCOL_VERSION,
        request_id: "req-1".to_string(),
        command: "list-agents".to_string(),
        payload: serde_json::json!({}),
    };
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.unwrap();
    write_half.flush().await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    let response: SocketResponse = serde_json::from_str(response_line.trim()).unwrap();
    assert!(response.is_ok());
    let agents = response.payload.unwrap()["agents"].as_array().unwrap().clone();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agent_id"], "alice");

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert!(!socket_path.exists(), "socket file should be removed on shutdown");
}
