//! The Agent record (spec §3: "Agent").

use serde::{Deserialize, Serialize};

/// A logical identity bound to a session; the unit of addressing for messages.
///
/// Persisted one-per-file at `agents/{agent_id}.json`. `session_id` is empty
/// for agents registered by an external actor before a session exists for
/// them (spec §3: "created ... OR when an external actor writes an agent
/// file").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    pub created_at: i64,
    pub last_seen_at: i64,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            directory: None,
            created_at: now_ms,
            last_seen_at: now_ms,
        }
    }

    /// Whether the agent is beyond `stale_seconds` idle with no active session.
    pub fn is_stale(&self, now_ms: i64, stale_seconds: u64, session_known: bool) -> bool {
        if session_known {
            return false;
        }
        let age_ms = now_ms.saturating_sub(self.last_seen_at);
        age_ms >= (stale_seconds as i64) * 1000
    }
}

/// Reserved agent id for the coordinator orchestrator (spec §4.9): never
/// reassigned, never garbage-collected by the normal stale-agent sweep.
pub const COORDINATOR_AGENT_ID: &str = "coordinator";

/// Synthetic sender id used for daemon-originated messages (e.g. NEW_AGENT
/// notifications to the coordinator, spec §4.9).
pub const DAEMON_SENDER_ID: &str = "daemon";
