//! Unix Socket Server (spec §4.12).
//!
//! Serves the newline-delimited JSON protocol consumed by
//! `broker_core::daemon_client`: one request line in, one response line out,
//! per connection. Read-only; never touches the pipeline or rate limiter.
//! Binding or serving a connection is never fatal to the daemon.

use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use broker_core::daemon_client::{AgentSummary, SessionSummary, SocketError, SocketRequest, SocketResponse, ThreadStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMPONENT: &str = "socket";

pub struct SocketPlugin {
    ctx: Option<PluginContext>,
}

impl SocketPlugin {
    pub fn new() -> Self {
        Self { ctx: None }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx.as_ref().expect("SocketPlugin::init must run before run()")
    }
}

impl Default for SocketPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SocketPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "socket",
            version: env!("CARGO_PKG_VERSION"),
            description: "Serves read-only agent/session/thread introspection over a Unix socket",
            capabilities: vec![Capability::Introspection],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    #[cfg(unix)]
    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        use tokio::net::UnixListener;

        let ctx = self.ctx().clone();
        let socket_path = ctx.state.home().join("daemon").join("broker.sock");

        if let Some(parent) = socket_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                ctx.health.report_error(COMPONENT, e.to_string());
                warn!(error = %e, "failed to create daemon socket directory");
                return Ok(());
            }
        }
        if socket_path.exists() {
            let _ = std::fs::remove_file(&socket_path);
        }

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => l,
            Err(e) => {
                ctx.health.report_error(COMPONENT, e.to_string());
                warn!(error = %e, path = %socket_path.display(), "failed to bind introspection socket; continuing without it");
                return Ok(());
            }
        };

        ctx.health.report_running(COMPONENT);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = std::fs::remove_file(&socket_path);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let ctx = ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, &ctx).await {
                                    debug!(error = %e, "introspection connection ended with an error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept introspection connection");
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn run(&mut self, _cancel: CancellationToken) -> Result<(), PluginError> {
        self.ctx().health.report_disabled(COMPONENT);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(unix)]
async fn serve_connection(stream: tokio::net::UnixStream, ctx: &PluginContext) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<SocketRequest>(line.trim()) {
        Ok(request) => handle_request(ctx, request).await,
        Err(e) => SocketResponse {
            version: broker_core::daemon_client::PROTOCOL_VERSION,
            request_id: "unknown".to_string(),
            status: "error".to_string(),
            payload: None,
            error: Some(SocketError {
                code: "BAD_REQUEST".to_string(),
                message: format!("malformed request: {e}"),
            }),
        },
    };

    let mut out = serde_json::to_string(&response)?;
    out.push('\n');
    write_half.write_all(out.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn handle_request(ctx: &PluginContext, request: SocketRequest) -> SocketResponse {
    let ok = |payload: serde_json::Value| SocketResponse {
        version: broker_core::daemon_client::PROTOCOL_VERSION,
        request_id: request.request_id.clone(),
        status: "ok".to_string(),
        payload: Some(payload),
        error: None,
    };
    let err = |code: &str, message: String| SocketResponse {
        version: broker_core::daemon_client::PROTOCOL_VERSION,
        request_id: request.request_id.clone(),
        status: "error".to_string(),
        payload: None,
        error: Some(SocketError {
            code: code.to_string(),
            message,
        }),
    };

    match request.command.as_str() {
        "list-agents" => {
            let agents: Vec<AgentSummary> = ctx
                .state
                .list_agents()
                .await
                .into_iter()
                .map(|a| AgentSummary {
                    agent_id: a.agent_id,
                    session_id: if a.session_id.is_empty() { None } else { Some(a.session_id) },
                    last_seen_at: a.last_seen_at,
                })
                .collect();
            ok(serde_json::json!({ "agents": agents }))
        }
        "list-sessions" => {
            let mut sessions = Vec::new();
            for session_id in ctx.state.known_session_ids().await {
                let Some(session) = ctx.state.get_session(&session_id).await else {
                    continue;
                };
                let oriented = ctx.state.is_oriented(&session_id).await;
                let agent_id = ctx.state.agent_for_session(&session_id).await;
                sessions.push(SessionSummary {
                    session_id: session.session_id,
                    slug: session.slug,
                    oriented,
                    agent_id,
                });
            }
            ok(serde_json::json!({ "sessions": sessions }))
        }
        "thread-status" => {
            let Some(thread_id) = request.payload.get("thread_id").and_then(|v| v.as_str()) else {
                return err("BAD_REQUEST", "missing thread_id".to_string());
            };
            match ctx.state.get_thread(thread_id).await {
                Some(thread) => ok(serde_json::to_value(ThreadStatus {
                    thread_id: thread.thread_id,
                    participants: thread.participants.into_iter().collect(),
                    last_activity_at: thread.last_activity_at,
                    closed: thread.closed,
                })
                .unwrap_or_else(|_| serde_json::json!({}))),
                None => err("NOT_FOUND", format!("unknown thread: {thread_id}")),
            }
        }
        other => err("UNKNOWN_COMMAND", format!("unknown command: {other}")),
    }
}
