//! File Watcher + Message Queue + Injection Worker Pool + Rate Limiter +
//! Thread Tracker (spec §4.4-§4.7).
//!
//! One plugin because these five components share a single internal channel:
//! the watcher and the startup directory scan are the only producers, the
//! worker pool is the only consumer, and the rate limiter / thread tracker
//! are just state-store calls a worker makes inline while processing a task.

use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use broker_core::event_log::{emit_event_best_effort, EventFields};
use broker_core::relay::RelayError;
use broker_core::schema::{Message, Thread};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMPONENT: &str = "message-pipeline";

/// A file observed in `messages/`, queued for a worker to parse and deliver.
#[derive(Debug, Clone)]
struct DeliveryTask {
    path: PathBuf,
}

pub struct MessagePipelinePlugin {
    ctx: Option<PluginContext>,
    queue_depth: Arc<AtomicI64>,
}

impl MessagePipelinePlugin {
    pub fn new() -> Self {
        Self {
            ctx: None,
            queue_depth: Arc::new(AtomicI64::new(0)),
        }
    }

    fn ctx(&self) -> &PluginContext {
        self.ctx.as_ref().expect("MessagePipelinePlugin::init must run before run()")
    }
}

impl Default for MessagePipelinePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for MessagePipelinePlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "message-pipeline",
            version: env!("CARGO_PKG_VERSION"),
            description: "Watches the spool, enforces rate limits, and delivers messages via the relay",
            capabilities: vec![Capability::MessageDelivery],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        let messages_dir = ctx.state.home().join("messages");
        std::fs::create_dir_all(messages_dir.join("archive"))
            .map_err(|e| PluginError::runtime(format!("failed to create spool directories: {e}")))?;
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        let ctx = self.ctx().clone();
        let messages_dir = ctx.state.home().join("messages");
        let workers = ctx.config.injection.workers.max(1);

        let (tx, rx) = mpsc::channel::<DeliveryTask>(4096);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        // Startup scan: recover any files left over from a previous run (spec §4.4).
        if let Ok(entries) = std::fs::read_dir(&messages_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && !is_staging(&path) {
                    self.queue_depth.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(DeliveryTask { path }).await;
                }
            }
        }

        let watcher_handle = spawn_watcher(
            messages_dir.clone(),
            tx.clone(),
            Arc::clone(&self.queue_depth),
            cancel.clone(),
            ctx.clone(),
        );

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = ctx.clone();
            let rx = Arc::clone(&rx);
            let queue_depth = Arc::clone(&self.queue_depth);
            let cancel = cancel.clone();
            worker_handles.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, rx, queue_depth, cancel).await;
            }));
        }

        ctx.health.report_running(COMPONENT);
        cancel.cancelled().await;
        let _ = watcher_handle.await;
        for handle in worker_handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Runs the notify watcher on a blocking task: the notify callback forwards
/// raw events into a sync `std::sync::mpsc` channel, which a blocking loop
/// drains with a timeout so it can observe `cancel` without busy-waiting.
fn spawn_watcher(
    dir: PathBuf,
    tx: mpsc::Sender<DeliveryTask>,
    queue_depth: Arc<AtomicI64>,
    cancel: CancellationToken,
    ctx: PluginContext,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<Event>();

        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                ctx.health.report_error(COMPONENT, e.to_string());
                warn!(error = %e, "failed to create file system watcher");
                return;
            }
        };

        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            ctx.health.report_error(COMPONENT, e.to_string());
            warn!(error = %e, path = %dir.display(), "failed to watch spool directory");
            return;
        }

        loop {
            if cancel.is_cancelled() {
                return;
            }
            match raw_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        continue;
                    }
                    for path in event.paths {
                        if !path.is_file() || is_staging(&path) {
                            continue;
                        }
                        queue_depth.fetch_add(1, Ordering::Relaxed);
                        let _ = tx.blocking_send(DeliveryTask { path });
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    })
}

fn is_staging(path: &std::path::Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(broker_core::io::is_staging_name)
        .unwrap_or(false)
}

async fn worker_loop(
    worker_id: usize,
    ctx: PluginContext,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DeliveryTask>>>,
    queue_depth: Arc<AtomicI64>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                task = guard.recv() => task,
            }
        };
        let Some(task) = task else { return };
        queue_depth.fetch_sub(1, Ordering::Relaxed);
        ctx.metrics.set_queue_size(queue_depth.load(Ordering::Relaxed));
        debug!(worker_id, path = %task.path.display(), "processing delivery task");
        process_task(&ctx, task).await;
    }
}

async fn process_task(ctx: &PluginContext, task: DeliveryTask) {
    let file_name = match task.path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_string(),
        None => return,
    };

    let contents = match std::fs::read_to_string(&task.path) {
        Ok(c) => c,
        Err(_) => return, // file vanished (e.g. already archived by a prior run), nothing to do.
    };

    let message: Message = match serde_json::from_str(&contents) {
        Ok(m) => m,
        Err(e) => {
            warn!(file_name, error = %e, "failed to parse message, archiving with .error sidecar");
            archive_parse_error(ctx, &task.path, &file_name, &e.to_string());
            ctx.metrics
                .messages_failed_parse_total
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    // 1. Rate check (spec §4.5 step 1, §4.7).
    if ctx.config.rate_limit.enabled {
        let allowed = ctx
            .state
            .check_rate_limit(
                &message.from,
                message.timestamp,
                ctx.config.rate_limit.max_messages,
                ctx.config.rate_limit.window_seconds,
                ctx.config.rate_limit.cooldown_seconds,
            )
            .await;
        if !allowed {
            archive(ctx, &task.path, &file_name, Some(("rateLimited", serde_json::json!(true))));
            ctx.metrics
                .messages_failed_rate_total
                .fetch_add(1, Ordering::Relaxed);
            emit_event_best_effort(EventFields {
                level: "info",
                source: "rate_limit",
                action: "reject",
                from: Some(message.from.clone()),
                to: Some(message.to.clone()),
                message_id: Some(file_name.clone()),
                result: Some("rate_limited".to_string()),
                ..Default::default()
            });
            return;
        }
    }

    // 2. TTL check (spec §4.5 step 2).
    let now = now_ms();
    if now.saturating_sub(message.timestamp) > (ctx.config.message.ttl_seconds as i64) * 1000 {
        archive(ctx, &task.path, &file_name, Some(("expired", serde_json::json!(true))));
        ctx.metrics
            .messages_failed_expired_total
            .fetch_add(1, Ordering::Relaxed);
        emit_event_best_effort(EventFields {
            level: "info",
            source: "ttl",
            action: "expire",
            from: Some(message.from.clone()),
            to: Some(message.to.clone()),
            message_id: Some(file_name.clone()),
            result: Some("expired".to_string()),
            ..Default::default()
        });
        return;
    }

    // 3-5. Recipient resolution, prompt composition, injection with retry.
    deliver(ctx, &task.path, &file_name, &message).await;
}

fn archive_parse_error(ctx: &PluginContext, path: &std::path::Path, file_name: &str, error: &str) {
    let archive_dir = ctx.state.home().join("messages/archive");
    let dest = archive_dir.join(file_name);
    if broker_core::io::archive_move(path, &dest).is_ok() {
        let sidecar = archive_dir.join(format!("{file_name}.error"));
        let _ = std::fs::write(sidecar, error);
    }
}

fn archive(
    ctx: &PluginContext,
    path: &std::path::Path,
    file_name: &str,
    annotation: Option<(&str, serde_json::Value)>,
) {
    if let Err(e) = ctx.state.archive_message(path, file_name, annotation) {
        warn!(file_name, error = %e, "failed to archive message");
    }
}

async fn deliver(ctx: &PluginContext, path: &std::path::Path, file_name: &str, message: &Message) {
    let base_timeout = Duration::from_millis(ctx.config.injection.timeout_ms);
    let max_retries = ctx.config.injection.retries;

    let mut session_id = resolve_recipient(ctx, &message.to, false).await;
    if session_id.is_none() {
        session_id = resolve_recipient(ctx, &message.to, true).await;
    }
    let mut resolution_attempts = 0u32;
    while session_id.is_none() && resolution_attempts < max_retries {
        resolution_attempts += 1;
        tokio::time::sleep(jittered(base_timeout * 2u32.pow(resolution_attempts - 1))).await;
        session_id = resolve_recipient(ctx, &message.to, true).await;
    }

    let Some(mut session_id) = session_id else {
        archive(ctx, path, file_name, Some(("undeliverable", serde_json::json!(true))));
        ctx.metrics
            .messages_failed_undeliverable_total
            .fetch_add(1, Ordering::Relaxed);
        emit_event_best_effort(EventFields {
            level: "warn",
            source: "injection",
            action: "inject",
            from: Some(message.from.clone()),
            to: Some(message.to.clone()),
            message_id: Some(file_name.to_string()),
            result: Some("undeliverable".to_string()),
            ..Default::default()
        });
        return;
    };

    let thread_id = thread_id_for(message);
    let text = compose_prompt(message, &thread_id);

    let mut attempt = 0u32;
    let mut notfound_refreshed = false;

    loop {
        match ctx.relay.inject(&session_id, &text).await {
            Ok(()) => {
                archive(ctx, path, file_name, None);
                touch_thread(ctx, message, &thread_id).await;
                ctx.metrics.messages_total.fetch_add(1, Ordering::Relaxed);
                ctx.metrics.injections_total.fetch_add(1, Ordering::Relaxed);
                emit_event_best_effort(EventFields {
                    level: "info",
                    source: "injection",
                    action: "inject",
                    session_id: Some(session_id.clone()),
                    from: Some(message.from.clone()),
                    to: Some(message.to.clone()),
                    thread_id: Some(thread_id.clone()),
                    message_id: Some(file_name.to_string()),
                    result: Some("ok".to_string()),
                    message_text: Some(message.content.clone()),
                    ..Default::default()
                });
                return;
            }
            Err(RelayError::NotFound) => {
                // Drop the stale mapping and retry resolution once, with
                // backoff (spec §4.5 step 5). Tracked independently of
                // `attempt` (the Unavailable retry counter) so a prior
                // transient-failure retry never consumes this one-shot path.
                if !notfound_refreshed {
                    notfound_refreshed = true;
                    ctx.state.remove_session(&session_id).await;
                    tokio::time::sleep(jittered(base_timeout)).await;
                    if let Some(refreshed) = resolve_recipient(ctx, &message.to, true).await {
                        session_id = refreshed;
                        continue;
                    }
                }
                archive(ctx, path, file_name, Some(("undeliverable", serde_json::json!(true))));
                ctx.metrics
                    .messages_failed_undeliverable_total
                    .fetch_add(1, Ordering::Relaxed);
                emit_event_best_effort(EventFields {
                    level: "warn",
                    source: "injection",
                    action: "inject",
                    from: Some(message.from.clone()),
                    to: Some(message.to.clone()),
                    message_id: Some(file_name.to_string()),
                    result: Some("undeliverable".to_string()),
                    error: Some("session not found".to_string()),
                    ..Default::default()
                });
                return;
            }
            Err(RelayError::Unavailable(reason)) => {
                attempt += 1;
                if attempt > max_retries {
                    warn!(file_name, reason, "injection exhausted retries");
                    archive(ctx, path, file_name, Some(("injectFailed", serde_json::json!(true))));
                    ctx.metrics
                        .messages_failed_inject_total
                        .fetch_add(1, Ordering::Relaxed);
                    emit_event_best_effort(EventFields {
                        level: "warn",
                        source: "injection",
                        action: "inject",
                        from: Some(message.from.clone()),
                        to: Some(message.to.clone()),
                        message_id: Some(file_name.to_string()),
                        result: Some("inject_failed".to_string()),
                        error: Some(reason.clone()),
                        ..Default::default()
                    });
                    return;
                }
                ctx.metrics.injections_retried_total.fetch_add(1, Ordering::Relaxed);
                let jitter = jittered(base_timeout * 2u32.pow(attempt.saturating_sub(1)));
                tokio::time::sleep(jitter).await;
            }
        }
    }
}

/// Resolve `agent_id`'s live session id. `refresh` forces a `list_sessions`
/// cache-refresh call first (spec §4.5 step 3); a cache older than
/// `session.cache_ttl_seconds` is also treated as a forced refresh, since a
/// stale cache is "not in the session cache" in every way that matters here.
///
/// This cache-refresh can populate `sessions` with a session the Registrar
/// hasn't finished onboarding yet, so a session is only ever resolvable once
/// `StateStore::is_ready` says its onboarding is complete (spec §5(i)) —
/// the refresh above is still useful for picking up directory/title changes
/// and for the `NotFound` drop-and-retry path, but it never on its own makes
/// a brand-new session deliverable.
    let now = now_ms();
    let refresh = refresh || ctx.state.sessions_cache_stale(now, ctx.config.session.cache_ttl_seconds);
    if refresh {
        if let Ok(sessions) = ctx.relay.list_sessions().await {
            for info in sessions {
                ctx.state
                    .upsert_session(broker_core::schema::Session::new(
                        info.id.clone(),
                        info.title.clone(),
                        info.directory.clone(),
                        info.created_at_ms().unwrap_or(now),
                    ))
                    .await;
            }
            ctx.state.mark_sessions_refreshed(now);
        }
    }

    let agent = ctx.state.get_agent(agent_id).await?;
    if agent.session_id.is_empty() {
        return None;
    }
    if ctx.state.get_session(&agent.session_id).await.is_some()
        && ctx.state.is_ready(&agent.session_id).await
    {
        Some(agent.session_id)
    } else {
        None
    }
}

fn thread_id_for(message: &Message) -> String {
    match &message.thread_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            let suffix: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
            format!("{}-{}-{}", message.from, message.to, suffix)
        }
    }
}

async fn touch_thread(ctx: &PluginContext, message: &Message, thread_id: &str) {
    let now = now_ms();
    let mut thread = ctx
        .state
        .get_thread(thread_id)
        .await
        .unwrap_or_else(|| Thread::new(thread_id, &message.from, &message.to, now));
    thread.touch(&message.from, &message.to, now);
    if message.is_resolved_completion() {
        thread.closed = true;
    }
    if let Err(e) = ctx.state.put_thread(thread).await {
        warn!(thread_id, error = %e, "failed to persist thread record");
    }
}

fn compose_prompt(message: &Message, thread_id: &str) -> String {
    format!(
        "--- Agent Broker Message ---\n\
         From: {from}\n\
         Type: {message_type:?}\n\
         Priority: {priority:?}\n\
         Thread: {thread_id}\n\
         \n\
         {content}\n\
         \n\
         Reply by sending a message back to `{from}` via the agent-hub MCP tools, \
         using the same thread id to keep the conversation linked. If this resolves \
         the thread, send a completion message containing the word RESOLVED.",
        from = message.from,
        message_type = message.message_type,
        priority = message.priority,
        content = message.content,
    )
}

fn jittered(base: Duration) -> Duration {
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let millis = (base.as_millis() as f64) * (1.0 + jitter_frac);
    Duration::from_millis(millis.max(0.0) as u64)
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_for_uses_explicit_id_when_present() {
        let message = Message {
            from: "alice".into(),
            to: "bob".into(),
            message_type: broker_core::schema::MessageType::Task,
            content: "hi".into(),
            priority: broker_core::schema::MessagePriority::Normal,
            thread_id: Some("t-42".into()),
            timestamp: 0,
        };
        assert_eq!(thread_id_for(&message), "t-42");
    }

    #[test]
    fn thread_id_for_generates_when_absent() {
        let message = Message {
            from: "alice".into(),
            to: "bob".into(),
            message_type: broker_core::schema::MessageType::Task,
            content: "hi".into(),
            priority: broker_core::schema::MessagePriority::Normal,
            thread_id: None,
            timestamp: 0,
        };
        let id = thread_id_for(&message);
        assert!(id.starts_with("alice-bob-"));
    }

    #[test]
    fn jittered_stays_within_twenty_percent() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let j = jittered(base);
            assert!(j.as_millis() >= 799 && j.as_millis() <= 1201, "jitter out of range: {j:?}");
        }
    }

    #[test]
    fn compose_prompt_includes_sender_and_content() {
        let message = Message {
            from: "alice".into(),
            to: "bob".into(),
            message_type: broker_core::schema::MessageType::Task,
            content: "ship it".into(),
            priority: broker_core::schema::MessagePriority::Normal,
            thread_id: Some("t-1".into()),
            timestamp: 0,
        };
        let text = compose_prompt(&message, "t-1");
        assert!(text.contains("alice"));
        assert!(text.contains("ship it"));
        assert!(text.contains("t-1"));
    }
}
