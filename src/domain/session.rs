//! Durable session aggregate

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::StoredMessage;

/// A conversation session with its message history and usage counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier
    pub session_id: String,
    /// Template this session was instantiated from
    pub template_id: String,
    /// Container the session runs in, if bound to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Ordered message history
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    /// Accumulated input token usage
    #[serde(default)]
    pub input_tokens: u64,
    /// Accumulated output token usage
    #[serde(default)]
    pub output_tokens: u64,
    /// Creation timestamp (Unix epoch milliseconds)
    pub created_at: i64,
    /// Last update timestamp (Unix epoch milliseconds)
    pub updated_at: i64,
    /// Arbitrary metadata attached to the session
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    /// Create a new session with a generated identifier
    pub fn new(template_id: impl Into<String>, container_id: Option<String>) -> Self {
        Self::with_id(
            format!("session_{}", Uuid::new_v4().simple()),
            template_id,
            container_id,
        )
    }

    /// Create a new session with an explicit identifier
    pub fn with_id(
        session_id: impl Into<String>,
        template_id: impl Into<String>,
        container_id: Option<String>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            session_id: session_id.into(),
            template_id: template_id.into(),
            container_id,
            messages: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Append a message and bump the update timestamp
    pub fn add_message(&mut self, message: StoredMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now().timestamp_millis();
    }

    /// Add turn token usage to the session counters
    pub fn add_usage(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.updated_at = Utc::now().timestamp_millis();
    }

    /// Number of messages in the session
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentPart, Role};

    #[test]
    fn new_session_has_unique_id() {
        let a = Session::new("tmpl", None);
        let b = Session::new("tmpl", None);
        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("session_"));
    }

    #[test]
    fn add_message_grows_history() {
        let mut session = Session::new("tmpl", Some("ctr_1".into()));
        session.add_message(StoredMessage {
            message_id: "m1".into(),
            role: Role::User,
            content: vec![ContentPart::text("hi")],
            timestamp: 1,
        });
        assert_eq!(session.message_count(), 1);
    }

    #[test]
    fn usage_accumulates() {
        let mut session = Session::new("tmpl", None);
        session.add_usage(10, 20);
        session.add_usage(1, 2);
        assert_eq!(session.input_tokens, 11);
        assert_eq!(session.output_tokens, 22);
    }
}
