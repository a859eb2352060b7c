//! The Session record (spec §3: "Session").

use serde::{Deserialize, Serialize};

/// A live interactive assistant instance reachable through the relay by a
/// stable id, as reported by `GET /session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    pub first_seen_at: i64,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        slug: Option<String>,
        directory: Option<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            slug,
            directory,
            first_seen_at: now_ms,
        }
    }
}
