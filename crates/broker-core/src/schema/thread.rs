//! The Thread record (spec §3: "Thread", §4.6: Thread Tracker).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A group of related messages sharing a thread id.
///
/// Persisted one-per-file at `threads/{thread_id}.json`. Writes are
/// idempotent: `last_activity_at` is updated and `participants` unioned on
/// every touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub participants: BTreeSet<String>,
    pub opened_at: i64,
    pub last_activity_at: i64,
    pub closed: bool,
}

impl Thread {
    pub fn new(thread_id: impl Into<String>, from: &str, to: &str, now_ms: i64) -> Self {
        let mut participants = BTreeSet::new();
        participants.insert(from.to_string());
        participants.insert(to.to_string());
        Self {
            thread_id: thread_id.into(),
            participants,
            opened_at: now_ms,
            last_activity_at: now_ms,
            closed: false,
        }
    }

    /// Idempotently record activity from `from`/`to` at `now_ms`.
    pub fn touch(&mut self, from: &str, to: &str, now_ms: i64) {
        self.participants.insert(from.to_string());
        self.participants.insert(to.to_string());
        self.last_activity_at = now_ms;
    }

    pub fn is_prunable(&self, now_ms: i64, ttl_seconds: u64) -> bool {
        let age_ms = now_ms.saturating_sub(self.last_activity_at);
        age_ms >= (ttl_seconds as i64) * 1000
    }
}
