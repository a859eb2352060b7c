//! The Message wire format (spec §3: "Message", §6: message file format).

use serde::{Deserialize, Serialize};

/// `type` field of a message file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Task,
    Question,
    Context,
    Completion,
    Error,
}

/// `priority` field of a message file. Defaults to `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A message file as deposited into the spool directory by a producer.
///
/// Filenames are opaque and producer-chosen (spec §6); this type is the
/// parsed body only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(rename = "threadId", default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub timestamp: i64,
}

impl Message {
    /// Whether `content` contains the literal token `RESOLVED`, bounded by
    /// whitespace/punctuation on both sides (spec Open Question (b): chosen
    /// to be token-bounded rather than substring).
    pub fn is_resolved_completion(&self) -> bool {
        self.message_type == MessageType::Completion && contains_resolved_token(&self.content)
    }
}

fn contains_resolved_token(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|tok| tok == "RESOLVED")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, message_type: MessageType) -> Message {
        Message {
            from: "a".into(),
            to: "b".into(),
            message_type,
            content: content.into(),
            priority: MessagePriority::Normal,
            thread_id: None,
            timestamp: 0,
        }
    }

    #[test]
    fn resolved_token_bounded_match() {
        assert!(msg("done — RESOLVED", MessageType::Completion).is_resolved_completion());
        assert!(msg("RESOLVED.", MessageType::Completion).is_resolved_completion());
        assert!(msg("(RESOLVED)", MessageType::Completion).is_resolved_completion());
    }

    #[test]
    fn resolved_substring_does_not_match() {
        assert!(!msg("UNRESOLVED", MessageType::Completion).is_resolved_completion());
        assert!(!msg("RESOLVEDLY", MessageType::Completion).is_resolved_completion());
    }

    #[test]
    fn resolved_wrong_type_does_not_match() {
        assert!(!msg("RESOLVED", MessageType::Task).is_resolved_completion());
    }

    #[test]
    fn priority_defaults_to_normal() {
        let json = r#"{"from":"a","to":"b","type":"task","content":"x","timestamp":0}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.priority, MessagePriority::Normal);
        assert!(m.thread_id.is_none());
    }

    #[test]
    fn full_roundtrip() {
        let json = r#"{"from":"alice","to":"bob","type":"task","content":"ship it","priority":"high","threadId":"t-1","timestamp":1000}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.from, "alice");
        assert_eq!(m.priority, MessagePriority::High);
        assert_eq!(m.thread_id.as_deref(), Some("t-1"));
        let back = serde_json::to_string(&m).unwrap();
        let reparsed: Message = serde_json::from_str(&back).unwrap();
        assert_eq!(m, reparsed);
    }
}
