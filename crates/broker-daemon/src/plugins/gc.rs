//! Garbage Collector (spec §4.8).
//!
//! Runs on its own interval, independent of the message pipeline and session
//! poller: it only ever reads/writes the State Store and the spool, and
//! never blocks either of the other two loops.

use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use broker_core::event_log::{emit_event_best_effort, EventFields};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMPONENT: &str = "gc";

pub struct GcPlugin {
    ctx: Option<PluginContext>,
}

impl GcPlugin {
    pub fn new() -> Self {
        Self { ctx: None }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx.as_ref().expect("GcPlugin::init must run before run()")
    }

    async fn sweep(&self) {
        let ctx = self.ctx();
        let now = now_ms();

        let expired_messages = expire_stale_messages(ctx, now);
        let pruned_agents = prune_stale_agents(ctx, now).await;
        let unbound_sessions = unbind_orphaned_sessions(ctx).await;
        let pruned_threads = prune_stale_threads(ctx, now).await;

        ctx.metrics.gc_runs_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        ctx.health.report_running(COMPONENT);
        debug!(
            expired_messages,
            pruned_agents, unbound_sessions, pruned_threads, "gc sweep complete"
        );
        let total = (expired_messages + pruned_agents + unbound_sessions + pruned_threads) as u64;
        if total > 0 {
            emit_event_best_effort(EventFields {
                level: "info",
                source: "gc",
                action: "sweep",
                result: Some(format!(
                    "expired={expired_messages} agents={pruned_agents} sessions={unbound_sessions} threads={pruned_threads}"
                )),
                count: Some(total),
                ..Default::default()
            });
        }
    }
}

impl Default for GcPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for GcPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "gc",
            version: env!("CARGO_PKG_VERSION"),
            description: "Prunes stale agents, expired messages, closed threads, and gone sessions",
            capabilities: vec![Capability::GarbageCollection],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        let interval_secs = self.ctx().config.gc.interval_seconds.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => self.sweep().await,
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Archive any pending spool message older than `message.ttl_seconds` (spec
/// §4.8 bullet 1). Runs synchronously over the directory listing rather than
/// through the injection pipeline, since these messages never reach a
/// worker: the GC sweep is the backstop for messages whose recipient never
/// triggered a delivery attempt.
fn expire_stale_messages(ctx: &PluginContext, now: i64) -> usize {
    let messages_dir = ctx.state.home().join("messages");
    let ttl_ms = (ctx.config.message.ttl_seconds as i64) * 1000;
    let mut expired = 0usize;

    let Ok(entries) = std::fs::read_dir(&messages_dir) else {
        return 0;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if broker_core::io::is_staging_name(file_name) {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(message) = serde_json::from_str::<broker_core::schema::Message>(&contents) else {
            continue;
        };
        if now.saturating_sub(message.timestamp) <= ttl_ms {
            continue;
        }
        if ctx
            .state
            .archive_message(&path, file_name, Some(("expired", serde_json::json!(true))))
            .is_ok()
        {
            expired += 1;
            ctx.metrics
                .messages_failed_expired_total
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            ctx.metrics
                .gc_messages_expired_total
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    expired
}

/// Remove agent records stale beyond `agent.stale_seconds` with no active
/// session (spec §4.8 bullet 2). The reserved `coordinator` agent id is
/// never pruned (spec §4.9).
async fn prune_stale_agents(ctx: &PluginContext, now: i64) -> usize {
    let stale_seconds = ctx.config.agent.stale_seconds;
    let mut pruned = 0usize;

    for agent in ctx.state.list_agents().await {
        if agent.agent_id == broker_core::schema::COORDINATOR_AGENT_ID {
            continue;
        }
        let session_known = !agent.session_id.is_empty()
            && ctx.state.get_session(&agent.session_id).await.is_some();
        if !agent.is_stale(now, stale_seconds, session_known) {
            continue;
        }
        if let Err(e) = ctx.state.remove_agent(&agent.agent_id).await {
            warn!(agent_id = %agent.agent_id, error = %e, "failed to remove stale agent record");
            continue;
        }
        pruned += 1;
        ctx.metrics.gc_agents_pruned_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!(agent_id = %agent.agent_id, "pruned stale agent");
    }

    pruned
}

/// Drop session-map entries whose session no longer exists and whose agent
/// record was already removed (spec §4.8 bullet 3).
async fn unbind_orphaned_sessions(ctx: &PluginContext) -> usize {
    let mut unbound = 0usize;
    for session_id in ctx.state.mapped_session_ids().await {
        if ctx.state.get_session(&session_id).await.is_some() {
            continue;
        }
        let Some(agent_id) = ctx.state.agent_for_session(&session_id).await else {
            continue;
        };
        if ctx.state.get_agent(&agent_id).await.is_some() {
            continue;
        }
        if ctx.state.unbind_session(&session_id).await.is_ok() {
            unbound += 1;
            ctx.metrics.gc_sessions_unbound_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
    unbound
}

/// Delete thread files inactive beyond `message.ttl_seconds` (spec §4.8
/// bullet 4): closed threads are the normal case, but a thread that simply
/// went quiet for the TTL is pruned too, matching §4.6 ("closed threads
/// remain on disk until GC removes them after ttl of inactivity").
async fn prune_stale_threads(ctx: &PluginContext, now: i64) -> usize {
    let ttl_seconds = ctx.config.message.ttl_seconds;
    let mut pruned = 0usize;

    for thread in ctx.state.list_threads().await {
        if !thread.is_prunable(now, ttl_seconds) {
            continue;
        }
        if ctx.state.remove_thread(&thread.thread_id).await.is_ok() {
            pruned += 1;
            ctx.metrics.gc_threads_pruned_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pruned
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
