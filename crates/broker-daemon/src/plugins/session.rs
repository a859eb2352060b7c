//! Session Poller + Orientation & Agent Registrar (spec §4.2, §4.3).
//!
//! Combined into one plugin because the ordering guarantee "orientation is
//! injected before any inter-agent message is delivered to that session"
//! (§5) requires orientation to happen synchronously within the same poll
//! tick that discovers the session, before it is visible to the injection
//! pipeline's recipient resolution. The pipeline's own cache-refreshing
//! `list_sessions` call (spec §4.5 step 3) can otherwise race ahead of this
//! and observe the session before orientation runs, so `handle_new_session`
//! marks the session `StateStore::mark_ready` only once onboarding is
//! finished; `resolve_recipient` treats an un-ready session as unresolvable
//! regardless of what its own cache refresh sees, making the guarantee hold
//! structurally rather than by timing.

use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use broker_core::event_log::{emit_event_best_effort, EventFields};
use broker_core::relay::{RelayClient, SessionInfo};
use broker_core::schema::{Agent, Session, COORDINATOR_AGENT_ID};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "session";

pub struct SessionPlugin {
    ctx: Option<PluginContext>,
    /// Sessions present on the very first successful poll; never oriented
    /// (spec §4.2: "prevents orientation spam on restart").
    pre_existing: Option<HashSet<String>>,
}

impl SessionPlugin {
    pub fn new() -> Self {
        Self {
            ctx: None,
            pre_existing: None,
        }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx.as_ref().expect("SessionPlugin::init must run before run()")
    }

    async fn tick(&mut self) -> Result<(), PluginError> {
        let ctx = self.ctx().clone();
        let fetched = match ctx.relay.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                // Unavailable: consecutive failures never count sessions as gone (spec §4.2).
                ctx.health.report_error(COMPONENT, e.to_string());
                debug!(error = %e, "session poll failed, skipping this tick");
                return Ok(());
            }
        };
        ctx.health.report_running(COMPONENT);
        ctx.state.mark_sessions_refreshed(now_ms());

        let fetched_ids: HashSet<String> = fetched.iter().map(|s| s.id.clone()).collect();
        let known_ids = ctx.state.known_session_ids().await;

        let first_poll = self.pre_existing.is_none();
        if first_poll {
            self.pre_existing = Some(fetched_ids.clone());
        }
        let pre_existing = self.pre_existing.clone().unwrap_or_default();

        for info in &fetched {
            if !known_ids.contains(&info.id) {
                self.handle_new_session(&ctx, info, pre_existing.contains(&info.id)).await;
            }
            ctx.state
                .upsert_session(Session::new(
                    info.id.clone(),
                    info.title.clone(),
                    info.directory.clone(),
                    info.created_at_ms().unwrap_or(now_ms()),
                ))
                .await;
        }

        for gone_id in known_ids.difference(&fetched_ids) {
            self.handle_gone_session(&ctx, gone_id).await;
        }

        Ok(())
    }

    async fn handle_new_session(&self, ctx: &PluginContext, info: &SessionInfo, pre_existing: bool) {
        info!(session_id = %info.id, "new session observed");

        let agent_id = match ctx.state.agent_for_session(&info.id).await {
            Some(existing) => existing,
            None => self.derive_agent_id(ctx, info).await,
        };

        if let Err(e) = ctx.state.bind_session_agent(&info.id, &agent_id).await {
            warn!(session_id = %info.id, error = %e, "failed to persist session->agent binding");
        }

        let now = now_ms();
        let mut agent = ctx
            .state
            .get_agent(&agent_id)
            .await
            .unwrap_or_else(|| Agent::new(agent_id.clone(), info.id.clone(), now));
        agent.session_id = info.id.clone();
        agent.directory = info.directory.clone();
        agent.last_seen_at = now;
        if let Err(e) = ctx.state.put_agent(agent).await {
            warn!(session_id = %info.id, error = %e, "failed to persist agent record");
            return;
        }
        ctx.metrics.agents_registered_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if pre_existing || ctx.state.is_oriented(&info.id).await {
            // Onboarding is already complete for this session; it is safe to
            // resolve as a recipient (spec §5(i)).
            ctx.state.mark_ready(&info.id).await;
            return;
        }

        self.orient(ctx, &info.id, &agent_id).await;
        // Onboarding has run to completion (success or permanent failure);
        // either way the Registrar is done with this session for now, so it
        // becomes resolvable (spec §5(i)). This must happen before the
        // caller upserts the session into the cache, so a worker's own
        // cache-refreshing `list_sessions` call can never observe the
        // session as resolvable ahead of orientation.
        ctx.state.mark_ready(&info.id).await;

        if ctx.config.coordinator.enabled && agent_id != COORDINATOR_AGENT_ID {
            self.notify_coordinator(ctx, &agent_id, info.directory.as_deref()).await;
        }
    }

    async fn derive_agent_id(&self, ctx: &PluginContext, info: &SessionInfo) -> String {
        let base = slugify(info.title.as_deref().unwrap_or(&info.id));
        if ctx.state.get_agent(&base).await.is_none() {
            return base;
        }
        // Collision: append a short suffix of the session id (spec Open Question (a)).
        let suffix: String = info.id.chars().rev().take(6).collect::<String>().chars().rev().collect();
        format!("{base}-{suffix}")
    }

    async fn orient(&self, ctx: &PluginContext, session_id: &str, agent_id: &str) {
        let prompt = orientation_prompt(agent_id);
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(ctx.config.injection.timeout_ms);
        loop {
            match ctx.relay.inject(session_id, &prompt).await {
                Ok(()) => {
                    if let Err(e) = ctx.state.mark_oriented(session_id).await {
                        warn!(session_id, error = %e, "failed to persist oriented-set");
                    }
                    ctx.metrics.sessions_oriented_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    info!(session_id, agent_id, "orientation prompt injected");
                    emit_event_best_effort(EventFields {
                        level: "info",
                        source: "orientation",
                        action: "orient",
                        session_id: Some(session_id.to_string()),
                        agent_id: Some(agent_id.to_string()),
                        result: Some("ok".to_string()),
                        ..Default::default()
                    });
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > ctx.config.injection.retries {
                        warn!(session_id, agent_id, error = %e, "orientation permanently failed; session remains un-oriented");
                        emit_event_best_effort(EventFields {
                            level: "warn",
                            source: "orientation",
                            action: "orient",
                            session_id: Some(session_id.to_string()),
                            agent_id: Some(agent_id.to_string()),
                            result: Some("failed".to_string()),
                            error: Some(e.to_string()),
                            ..Default::default()
                        });
                        return;
                    }
                    warn!(session_id, agent_id, error = %e, attempt, "orientation injection failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn notify_coordinator(&self, ctx: &PluginContext, agent_id: &str, directory: Option<&str>) {
        let directory = directory.unwrap_or("(unknown)");
        let body = serde_json::json!({
            "from": broker_core::schema::DAEMON_SENDER_ID,
            "to": COORDINATOR_AGENT_ID,
            "type": "context",
            "content": format!("NEW_AGENT: {agent_id} at {directory}"),
            "timestamp": now_ms(),
        });
        let messages_dir = ctx.state.home().join("messages");
        if let Err(e) = std::fs::create_dir_all(&messages_dir) {
            warn!(error = %e, "failed to create messages directory for coordinator notification");
            return;
        }
        let file_name = format!("new-agent-{agent_id}-{}.json", Uuid::new_v4());
        let path = messages_dir.join(&file_name);
        if let Err(e) = broker_core::io::write_json_atomic(&path, &body) {
            warn!(error = %e, "failed to write coordinator notification");
        }
    }

    async fn handle_gone_session(&self, ctx: &PluginContext, session_id: &str) {
        info!(session_id, "session gone");
        ctx.state.remove_session(session_id).await;
        ctx.state.forget_ready(session_id).await;
        if let Err(e) = ctx.state.forget_oriented(session_id).await {
            warn!(session_id, error = %e, "failed to forget oriented session");
        }
    }
}

impl Default for SessionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SessionPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "session",
            version: env!("CARGO_PKG_VERSION"),
            description: "Discovers sessions via the relay and registers/orients new agents",
            capabilities: vec![Capability::SessionDiscovery],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        let poll_seconds = self.ctx().config.session.poll_seconds.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(poll_seconds));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    self.tick().await?;
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

fn orientation_prompt(agent_id: &str) -> String {
    format!(
        "You are now connected to the agent broker as `{agent_id}`.\n\
         Use the agent-hub MCP tools to send messages to other agents. Message types: \
         task, question, context, completion, error. Address replies to the sender's agent id."
    )
}

fn slugify(input: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = true;
    for c in input.chars() {
        if c.is_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "agent".to_string()
    } else {
        slug
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
