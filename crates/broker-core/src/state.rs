//! The in-memory State Store (spec §2, §3, §5).
//!
//! One `tokio::sync` lock per table, matching the documented lock order
//! `agents → sessions → threads` (spec §5): any helper that needs more than
//! one table takes them in that order and releases before calling back out
//! to another table. `oriented` and `session_agent_map` are leaves of that
//! order — they are never held alongside another table lock across an
//! `.await`. Rate counters live here too (spec §2's component table lists
//! them as a State Store table) but are never persisted (spec §4.7).

use crate::io::{archive_move, write_json_atomic};
use crate::schema::{Agent, Session, Thread};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Sliding-window send history for one sender (spec §3 "Rate Counter", §4.7).
#[derive(Debug, Default, Clone)]
pub struct RateCounterState {
    pub sends: VecDeque<i64>,
    pub last_sent_at: Option<i64>,
}

pub struct StateStore {
    home: PathBuf,
    agents: RwLock<HashMap<String, Agent>>,
    sessions: RwLock<HashMap<String, Session>>,
    oriented: Mutex<HashSet<String>>,
    session_agent_map: RwLock<HashMap<String, String>>,
    threads: RwLock<HashMap<String, Thread>>,
    rate_counters: Mutex<HashMap<String, RateCounterState>>,
    /// Sessions for which the Registrar's synchronous onboarding (orient,
    /// or the pre-existing/already-oriented skip) has completed, making them
    /// eligible for recipient resolution (spec §5(i)). Process-local: every
    /// restart rebuilds it from scratch via the poller's first tick, which
    /// mirrors the oriented-set's own pre-existing reset on restart.
    ready: Mutex<HashSet<String>>,
    /// Timestamp of the last successful `list_sessions` call that populated
    /// `sessions`, used to bound trust in the cache by `session.cache_ttl_seconds`
    /// (spec §3 "session cache", §4.5 step 3).
    sessions_refreshed_at: AtomicI64,
}

impl StateStore {
    pub fn empty(home: PathBuf) -> Self {
        Self {
            home,
            agents: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            oriented: Mutex::new(HashSet::new()),
            session_agent_map: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
            rate_counters: Mutex::new(HashMap::new()),
            ready: Mutex::new(HashSet::new()),
            sessions_refreshed_at: AtomicI64::new(0),
        }
    }

    /// Load persisted state from `home` (spec §3 Invariant 3/4: the
    /// oriented-set and session→agent map survive restarts).
    pub async fn load(home: PathBuf) -> anyhow::Result<Self> {
        let store = Self::empty(home.clone());

        let agents_dir = home.join("agents");
        if agents_dir.is_dir() {
            let mut agents = store.agents.write().await;
            for entry in std::fs::read_dir(&agents_dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let contents = std::fs::read_to_string(entry.path())?;
                if let Ok(agent) = serde_json::from_str::<Agent>(&contents) {
                    agents.insert(agent.agent_id.clone(), agent);
                }
            }
        }

        let map_path = home.join("session_agents.json");
        if map_path.is_file() {
            let contents = std::fs::read_to_string(&map_path)?;
            if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(&contents) {
                *store.session_agent_map.write().await = map;
            }
        }

        let oriented_path = home.join("oriented_sessions.json");
        if oriented_path.is_file() {
            let contents = std::fs::read_to_string(&oriented_path)?;
            if let Ok(list) = serde_json::from_str::<Vec<String>>(&contents) {
                *store.oriented.lock().await = list.into_iter().collect();
            }
        }

        let threads_dir = home.join("threads");
        if threads_dir.is_dir() {
            let mut threads = store.threads.write().await;
            for entry in std::fs::read_dir(&threads_dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let contents = std::fs::read_to_string(entry.path())?;
                if let Ok(thread) = serde_json::from_str::<Thread>(&contents) {
                    threads.insert(thread.thread_id.clone(), thread);
                }
            }
        }

        Ok(store)
    }

    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    // ---- Agents ----

    pub async fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Write or refresh an agent record, persisting to `agents/{id}.json`.
    pub async fn put_agent(&self, agent: Agent) -> anyhow::Result<()> {
        let path = self.home.join("agents").join(format!("{}.json", agent.agent_id));
        write_json_atomic(&path, &agent)?;
        self.agents.write().await.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    pub async fn remove_agent(&self, agent_id: &str) -> anyhow::Result<()> {
        self.agents.write().await.remove(agent_id);
        let path = self.home.join("agents").join(format!("{agent_id}.json"));
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    // ---- Sessions (in-memory cache only, not persisted — spec §3) ----

    pub async fn upsert_session(&self, session: Session) {
        self.sessions.write().await.insert(session.session_id.clone(), session);
    }

    /// Record that the session cache was just refreshed from the relay.
    pub fn mark_sessions_refreshed(&self, now_ms: i64) {
        self.sessions_refreshed_at.store(now_ms, Ordering::Relaxed);
    }

    /// Whether the session cache is older than `ttl_seconds` and should be
    /// treated as "not in the session cache" for recipient resolution
    /// purposes (spec §3 session cache TTL, §4.5 step 3).
    pub fn sessions_cache_stale(&self, now_ms: i64, ttl_seconds: u64) -> bool {
        let refreshed_at = self.sessions_refreshed_at.load(Ordering::Relaxed);
        if refreshed_at == 0 {
            return true;
        }
        now_ms.saturating_sub(refreshed_at) > (ttl_seconds as i64) * 1000
    }

    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn known_session_ids(&self) -> HashSet<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    // ---- Oriented-set (spec §3 Invariant 3) ----

    pub async fn is_oriented(&self, session_id: &str) -> bool {
        self.oriented.lock().await.contains(session_id)
    }

    pub async fn mark_oriented(&self, session_id: &str) -> anyhow::Result<()> {
        let mut guard = self.oriented.lock().await;
        guard.insert(session_id.to_string());
        self.persist_oriented(&guard)
    }

    pub async fn forget_oriented(&self, session_id: &str) -> anyhow::Result<()> {
        let mut guard = self.oriented.lock().await;
        guard.remove(session_id);
        self.persist_oriented(&guard)
    }

    fn persist_oriented(&self, set: &HashSet<String>) -> anyhow::Result<()> {
        let mut list: Vec<&String> = set.iter().collect();
        list.sort();
        write_json_atomic(&self.home.join("oriented_sessions.json"), &list)?;
        Ok(())
    }

    // ---- Readiness gate (spec §5(i)) ----

    /// Whether `session_id` has finished the Registrar's synchronous
    /// onboarding and is safe to treat as a resolvable recipient. Not
    /// persisted: see the `ready` field doc comment.
    pub async fn is_ready(&self, session_id: &str) -> bool {
        self.ready.lock().await.contains(session_id)
    }

    pub async fn mark_ready(&self, session_id: &str) {
        self.ready.lock().await.insert(session_id.to_string());
    }

    pub async fn forget_ready(&self, session_id: &str) {
        self.ready.lock().await.remove(session_id);
    }

    // ---- Session→Agent map (spec §3 Invariant 4) ----

    pub async fn agent_for_session(&self, session_id: &str) -> Option<String> {
        self.session_agent_map.read().await.get(session_id).cloned()
    }

    pub async fn session_for_agent(&self, agent_id: &str) -> Option<String> {
        self.session_agent_map
            .read()
            .await
            .iter()
            .find(|(_, a)| a.as_str() == agent_id)
            .map(|(s, _)| s.clone())
    }

    pub async fn bind_session_agent(&self, session_id: &str, agent_id: &str) -> anyhow::Result<()> {
        let mut guard = self.session_agent_map.write().await;
        guard.insert(session_id.to_string(), agent_id.to_string());
        self.persist_session_agent_map(&guard)
    }

    pub async fn unbind_session(&self, session_id: &str) -> anyhow::Result<()> {
        let mut guard = self.session_agent_map.write().await;
        guard.remove(session_id);
        self.persist_session_agent_map(&guard)
    }

    /// All session ids currently present in the Session→Agent Map, used by
    /// GC to find entries whose session has since disappeared.
    pub async fn mapped_session_ids(&self) -> Vec<String> {
        self.session_agent_map.read().await.keys().cloned().collect()
    }

    fn persist_session_agent_map(&self, map: &HashMap<String, String>) -> anyhow::Result<()> {
        write_json_atomic(&self.home.join("session_agents.json"), map)?;
        Ok(())
    }

    // ---- Threads ----

    pub async fn get_thread(&self, thread_id: &str) -> Option<Thread> {
        self.threads.read().await.get(thread_id).cloned()
    }

    pub async fn put_thread(&self, thread: Thread) -> anyhow::Result<()> {
        let path = self.home.join("threads").join(format!("{}.json", thread.thread_id));
        write_json_atomic(&path, &thread)?;
        self.threads.write().await.insert(thread.thread_id.clone(), thread);
        Ok(())
    }

    pub async fn remove_thread(&self, thread_id: &str) -> anyhow::Result<()> {
        self.threads.write().await.remove(thread_id);
        let path = self.home.join("threads").join(format!("{thread_id}.json"));
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub async fn list_threads(&self) -> Vec<Thread> {
        self.threads.read().await.values().cloned().collect()
    }

    // ---- Rate counters (process-local, never persisted — spec §4.7) ----

    /// Apply the sliding-window + cooldown rate-limit decision for `from` at
    /// `now_ms`, recording the send on allow. Returns `true` if the send is
    /// allowed.
    pub async fn check_rate_limit(
        &self,
        from: &str,
        now_ms: i64,
        max_messages: usize,
        window_seconds: u64,
        cooldown_seconds: u64,
    ) -> bool {
        let mut counters = self.rate_counters.lock().await;
        let entry = counters.entry(from.to_string()).or_default();

        let window_ms = (window_seconds as i64) * 1000;
        while let Some(&front) = entry.sends.front() {
            if now_ms.saturating_sub(front) > window_ms {
                entry.sends.pop_front();
            } else {
                break;
            }
        }

        let within_cooldown = entry
            .last_sent_at
            .map(|last| now_ms.saturating_sub(last) < (cooldown_seconds as i64) * 1000)
            .unwrap_or(false);

        if entry.sends.len() >= max_messages || within_cooldown {
            return false;
        }

        entry.sends.push_back(now_ms);
        entry.last_sent_at = Some(now_ms);
        true
    }

    // ---- Spool archival (spec §3 Invariant 2, §6) ----

    /// Move a spool message into `messages/archive/`, annotating it with
    /// `annotation_key: true` (e.g. `rateLimited`, `expired`, `undeliverable`,
    /// `injectFailed`) when given.
    pub fn archive_message(
        &self,
        from: &std::path::Path,
        file_name: &str,
        annotation: Option<(&str, serde_json::Value)>,
    ) -> anyhow::Result<()> {
        let to = self.home.join("messages/archive").join(file_name);
        if let Some((key, value)) = annotation {
            let contents = std::fs::read_to_string(from)?;
            let mut json: serde_json::Value = serde_json::from_str(&contents)
                .unwrap_or_else(|_| serde_json::json!({ "raw": contents }));
            if let Some(obj) = json.as_object_mut() {
                obj.insert(key.to_string(), value);
            }
            write_json_atomic(&to, &json)?;
            std::fs::remove_file(from)?;
        } else {
            archive_move(from, &to)?;
        }
        Ok(())
    }
}
