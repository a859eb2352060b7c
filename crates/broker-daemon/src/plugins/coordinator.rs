//! Coordinator Orchestrator (spec §4.9).
//!
//! Spawns and supervises a dedicated coordinator session, then gets out of
//! its way: once registered as agent id `coordinator`, it flows through the
//! same message pipeline as any other agent (session.rs already skips
//! re-deriving a slug for an already-bound session, and skips sending the
//! coordinator its own NEW_AGENT notification).

use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use broker_core::schema::{Agent, COORDINATOR_AGENT_ID};
use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const COMPONENT: &str = "coordinator";

/// Default instructions written when none of the searched paths exist
/// (spec §4.9: "if none found, a minimal default is written").
const DEFAULT_INSTRUCTIONS: &str = "You are the coordinator agent for this broker. \
You will receive NEW_AGENT context messages as other agents join. \
Introduce newly arrived agents to the agents already present, then stay silent \
until another agent addresses you directly.";

pub struct CoordinatorPlugin {
    ctx: Option<PluginContext>,
}

impl CoordinatorPlugin {
    pub fn new() -> Self {
        Self { ctx: None }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx
            .as_ref()
            .expect("CoordinatorPlugin::init must run before run()")
    }

    /// Searches `instructions_path` if set, otherwise a fixed precedence
    /// list under the broker home, falling back to writing the default.
    fn resolve_instructions(&self) -> std::path::PathBuf {
        let ctx = self.ctx();
        if let Some(configured) = &ctx.config.coordinator.instructions_path {
            let path = std::path::PathBuf::from(configured);
            if path.is_file() {
                return path;
            }
        }

        let candidates = [
            ctx.state.home().join("coordinator-instructions.md"),
            ctx.state.home().join("COORDINATOR.md"),
        ];
        for candidate in &candidates {
            if candidate.is_file() {
                return candidate.clone();
            }
        }

        let default_path = ctx.state.home().join("coordinator-instructions.md");
        if let Err(e) = std::fs::write(&default_path, DEFAULT_INSTRUCTIONS) {
            warn!(error = %e, "failed to write default coordinator instructions");
        }
        default_path
    }

    fn spawn_command(&self, instructions_path: &std::path::Path) -> (String, Vec<String>) {
        let ctx = self.ctx();
        let mut args = vec![
            "--model".to_string(),
            ctx.config.coordinator.model.clone(),
            "--append-system-prompt-file".to_string(),
            instructions_path.display().to_string(),
        ];
        if let Some(directory) = &ctx.config.coordinator.directory {
            args.push("--add-dir".to_string());
            args.push(directory.clone());
        }
        ("claude".to_string(), args)
    }

    /// Returns `Some(session_id)` once a coordinator session is live,
    /// spawning the external process if one isn't already registered.
    async fn ensure_coordinator_session(&self) -> Option<String> {
        let ctx = self.ctx();

        if let Some(session_id) = ctx.state.session_for_agent(COORDINATOR_AGENT_ID).await {
            if let Ok(sessions) = ctx.relay.list_sessions().await {
                if sessions.iter().any(|s| s.id == session_id) {
                    return Some(session_id);
                }
            }
            info!(session_id, "coordinator session no longer live, respawning");
        }

        let before: HashSet<String> = match ctx.relay.list_sessions().await {
            Ok(sessions) => sessions.into_iter().map(|s| s.id).collect(),
            Err(e) => {
                warn!(error = %e, "could not snapshot sessions before spawning coordinator");
                HashSet::new()
            }
        };

        let instructions_path = self.resolve_instructions();
        let (program, args) = self.spawn_command(&instructions_path);
        info!(%program, "spawning coordinator session");
        if let Err(e) = std::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            warn!(error = %e, "failed to spawn coordinator process");
            return None;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        let mut backoff = Duration::from_millis(200);
        loop {
            if let Ok(sessions) = ctx.relay.list_sessions().await {
                if let Some(new_session) = sessions.iter().find(|s| !before.contains(&s.id)) {
                    return Some(new_session.id.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(2));
        }
    }

    async fn register(&self, session_id: &str) {
        let ctx = self.ctx();
        let now = now_ms();
        if let Err(e) = ctx.state.bind_session_agent(session_id, COORDINATOR_AGENT_ID).await {
            warn!(error = %e, "failed to bind coordinator session");
            return;
        }
        let mut agent = ctx
            .state
            .get_agent(COORDINATOR_AGENT_ID)
            .await
            .unwrap_or_else(|| Agent::new(COORDINATOR_AGENT_ID, session_id, now));
        agent.session_id = session_id.to_string();
        agent.last_seen_at = now;
        if let Err(e) = ctx.state.put_agent(agent).await {
            warn!(error = %e, "failed to persist coordinator agent record");
            return;
        }
        // The coordinator has no orientation prompt of its own; registration
        // completing here is its entire onboarding, so it is immediately
        // resolvable as a recipient (spec §5(i), mirrored from session.rs).
        ctx.state.mark_ready(session_id).await;
    }
}

impl Default for CoordinatorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for CoordinatorPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "coordinator",
            version: env!("CARGO_PKG_VERSION"),
            description: "Ensures a dedicated coordinator session exists and stays registered",
            capabilities: vec![Capability::Coordination],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        if !self.ctx().config.coordinator.enabled {
            self.ctx().health.report_disabled(COMPONENT);
            return Ok(());
        }

        match self.ensure_coordinator_session().await {
            Some(session_id) => {
                self.register(&session_id).await;
                self.ctx().health.report_running(COMPONENT);
            }
            None => {
                self.ctx().health.report_error(COMPONENT, "coordinator session did not appear");
            }
        }

        let poll_seconds = self.ctx().config.session.poll_seconds.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(poll_seconds * 2));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    match self.ensure_coordinator_session().await {
                        Some(session_id) => {
                            self.register(&session_id).await;
                            self.ctx().health.report_running(COMPONENT);
                        }
                        None => {
                            self.ctx().health.report_error(COMPONENT, "coordinator session unreachable");
                        }
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
