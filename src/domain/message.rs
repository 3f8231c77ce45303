//! Message roles and content parts

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message (instructions to the model)
    System,
    /// User message
    User,
    /// Assistant (model) message
    Assistant,
    /// Tool result message
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One element of a message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text content
    Text { text: String },
    /// A tool call made by the assistant
    ToolInvocation {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Result returned by a tool
    ToolResult {
        tool_call_id: String,
        payload: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Opaque binary content, stored out of band
    Binary {
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl ContentPart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool invocation part
    pub fn tool_invocation(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self::ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool result part
    pub fn tool_result(tool_call_id: impl Into<String>, payload: Value, is_error: bool) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            payload,
            is_error,
        }
    }

    /// Text content of this part, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message in its persisted form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Unique message identifier
    pub message_id: String,
    /// Role of the message sender
    pub role: Role,
    /// Ordered message body
    pub content: Vec<ContentPart>,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl StoredMessage {
    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect()
    }
}
