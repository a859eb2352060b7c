//! End-to-end orchestration tests wiring the real plugins together through
//! [`broker_daemon::daemon::run`] against a shared state store and a mock
//! relay, rather than exercising one plugin at a time.

use broker_core::config::Config;
use broker_core::daemon_client::SocketRequest;
use broker_core::schema::Message;
use broker_daemon::daemon;
use broker_daemon::plugin::PluginRegistry;
use broker_daemon::plugins::{GcPlugin, MessagePipelinePlugin, SessionPlugin, SocketPlugin};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod support;
use support::{now_ms, session_info, test_context_with, MockRelayClient};

fn write_message(dir: &std::path::Path, file_name: &str, message: &Message) {
    std::fs::write(dir.join(file_name), serde_json::to_vec(message).unwrap()).unwrap();
}

/// A new session appears, gets registered and oriented, then receives a
/// message from another already-known agent — all driven by the live
/// session poller, pipeline, and GC plugins running concurrently.
#[tokio::test]
async fn a_new_session_is_onboarded_and_then_receives_a_message() {
    let dir = tempfile::TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![session_info("s-new")]));
    let mut config = Config::default();
    config.session.poll_seconds = 1;
    config.gc.interval_seconds = 3600;
    let ctx = test_context_with(dir.path(), config, relay.clone());

    // A sender agent already exists, with its own oriented session.
    ctx.state
        .put_agent(broker_core::schema::Agent::new("alice", "s-alice", now_ms()))
        .await
        .unwrap();
    ctx.state
        .upsert_session(broker_core::schema::Session::new("s-alice", None, None, now_ms()))
        .await;

    let mut registry = PluginRegistry::new();
    registry.register(SessionPlugin::new());
    registry.register(MessagePipelinePlugin::new());
    registry.register(GcPlugin::new());

    let cancel = CancellationToken::new();
    let cancel_for_task = cancel.clone();
    let ctx_for_task = ctx.clone();
    let handle = tokio::spawn(async move {
        daemon::run(registry, &ctx_for_task, cancel_for_task, Duration::from_secs(1)).await
    });

    // Let the session poller discover and orient "s-new".
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(ctx.state.is_oriented("s-new").await, "new session should have been oriented");
    let new_agent_id = ctx.state.agent_for_session("s-new").await.expect("agent should be bound to session");

    // Now alice sends the newly-discovered agent a message through the spool.
    let msg = Message {
        from: "alice".to_string(),
        to: new_agent_id.clone(),
        message_type: broker_core::schema::MessageType::Task,
        content: "welcome aboard".to_string(),
        priority: broker_core::schema::MessagePriority::Normal,
        thread_id: Some("t-welcome".to_string()),
        timestamp: now_ms(),
    };
    write_message(&ctx.state.home().join("messages"), "welcome.json", &msg);

    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let injected = relay.injected();
    assert!(
        injected.iter().any(|(sid, _)| sid == "s-new"),
        "orientation should have been injected into the new session"
    );
    assert!(
        injected.iter().any(|(sid, text)| sid == "s-new" && text.contains("welcome aboard")),
        "the welcome message should have been delivered to the new session: {injected:?}"
    );
    assert!(ctx.state.get_thread("t-welcome").await.is_some());
}

/// A session that disappears from the relay is forgotten, and its agent
/// record is then pruned on the next GC sweep since it no longer has a
/// known session.
#[tokio::test]
async fn a_session_going_away_is_forgotten_and_its_agent_is_later_pruned() {
    let dir = tempfile::TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![session_info("s-leaving")]));
    let mut config = Config::default();
    config.session.poll_seconds = 1;
    config.gc.interval_seconds = 1;
    config.agent.stale_seconds = 0;
    let ctx = test_context_with(dir.path(), config, relay.clone());

    let mut registry = PluginRegistry::new();
    registry.register(SessionPlugin::new());
    registry.register(GcPlugin::new());

    let cancel = CancellationToken::new();
    let cancel_for_task = cancel.clone();
    let ctx_for_task = ctx.clone();
    let handle = tokio::spawn(async move {
        daemon::run(registry, &ctx_for_task, cancel_for_task, Duration::from_secs(1)).await
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    let agent_id = ctx.state.agent_for_session("s-leaving").await.expect("session should be onboarded");

    relay.set_sessions(vec![]);
    tokio::time::sleep(Duration::from_millis(2300)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert!(ctx.state.get_session("s-leaving").await.is_none());
    assert!(ctx.state.get_agent(&agent_id).await.is_none(), "agent with no known session should have been pruned by gc");
}

/// The socket plugin serves a live view of state assembled by the other
/// plugins while the daemon is running.
#[cfg(unix)]
#[tokio::test]
async fn the_socket_reports_sessions_onboarded_by_the_running_daemon() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let dir = tempfile::TempDir::new().unwrap();
    let relay = Arc::new(MockRelayClient::new(vec![session_info("s-observed")]));
    let mut config = Config::default();
    config.session.poll_seconds = 1;
    config.gc.interval_seconds = 3600;
    let ctx = test_context_with(dir.path(), config, relay);

    let mut registry = PluginRegistry::new();
    registry.register(SessionPlugin::new());
    registry.register(SocketPlugin::new());

    let cancel = CancellationToken::new();
    let cancel_for_task = cancel.clone();
    let ctx_for_task = ctx.clone();
    let handle = tokio::spawn(async move {
        daemon::run(registry, &ctx_for_task, cancel_for_task, Duration::from_secs(1)).await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;

    let socket_path = ctx.state.home().join("daemon").join("broker.sock");
    let stream = UnixStream::connect(&socket_path).await.expect("socket should be listening");
    let (read_half, mut write_half) = stream.into_split();
    let request = SocketRequest {
        version: broker_core::daemon_client::PROTOCOL_VERSION,
        request_id: "req-1".to_string(),
        command: "list-sessions".to_string(),
        payload: serde_json::json!({}),
    };
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.unwrap();
    write_half.flush().await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    let response: broker_core::daemon_client::SocketResponse = serde_json::from_str(response_line.trim()).unwrap();
    assert!(response.is_ok());
    let payload = response.payload.unwrap();
    let sessions = payload["sessions"].as_array().unwrap();
    assert!(sessions.iter().any(|s| s["session_id"] == "s-observed"));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
