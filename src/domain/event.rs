//! Raw and derived events flowing through the transformation pipeline
//!
//! Raw events arrive from the inference engine as an open-but-bounded
//! vocabulary of stream signals. The pipeline turns them into three derived
//! kinds: state transitions, assembled messages, and turn summaries. Derived
//! events serialize to the newline-delimited JSON wire shape consumed by the
//! transport layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ContentPart, Role, ToolCallRecord};

/// An unprocessed signal from the inference engine
///
/// Raw events are ephemeral: they drive the pipeline and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Kind-specific payload
    #[serde(flatten)]
    pub payload: RawPayload,
}

impl RawEvent {
    /// Create a raw event
    pub fn new(timestamp: i64, payload: RawPayload) -> Self {
        Self { timestamp, payload }
    }

    /// Create a text delta event
    pub fn text_delta(timestamp: i64, text: impl Into<String>, is_final: bool) -> Self {
        Self::new(
            timestamp,
            RawPayload::TextDelta {
                text: text.into(),
                is_final,
            },
        )
    }

    /// Create a turn-boundary event
    pub fn message_stop(timestamp: i64, stop_reason: impl Into<String>) -> Self {
        Self::new(
            timestamp,
            RawPayload::MessageStop {
                stop_reason: stop_reason.into(),
            },
        )
    }
}

/// Kind-tagged payload of a raw event
///
/// A closed sum type: adding a kind is a compile-time-checked change to every
/// stage that matches on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum RawPayload {
    /// The model started producing a message
    MessageStart {
        #[serde(default)]
        message_id: String,
        #[serde(default)]
        model: String,
        #[serde(default)]
        input_tokens: u64,
    },
    /// Mid-message usage/stop-reason update
    MessageDelta {
        #[serde(default)]
        output_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    /// The model finished the message (turn boundary)
    MessageStop {
        #[serde(default)]
        stop_reason: String,
    },
    /// A text content block opened
    TextBlockStart,
    /// A fragment of streamed text
    TextDelta {
        #[serde(default)]
        text: String,
        #[serde(default, rename = "final")]
        is_final: bool,
    },
    /// A text content block closed
    TextBlockStop,
    /// The model started planning a tool call
    ToolUseStart {
        tool_call_id: String,
        tool_name: String,
    },
    /// A fragment of the tool call's JSON arguments
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    /// The tool call's arguments are complete
    ToolUseStop { tool_call_id: String },
    /// A tool execution finished
    ToolResult {
        tool_call_id: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// The stream reported an error
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl RawPayload {
    /// Stable kind name, matching the wire tag
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop { .. } => "message_stop",
            Self::TextBlockStart => "text_block_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextBlockStop => "text_block_stop",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::InputJsonDelta { .. } => "input_json_delta",
            Self::ToolUseStop { .. } => "tool_use_stop",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
        }
    }
}

/// Coarse agent state projected from the raw event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentPhase {
    /// No work in flight
    Idle,
    /// A request is being processed, no output yet
    Thinking,
    /// Text is streaming out
    Responding,
    /// A tool call is being planned
    PlanningTool,
    /// A tool call was issued, waiting for its result
    AwaitingToolResult,
    /// The stream reported an error
    Error,
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
            Self::PlanningTool => "planning-tool",
            Self::AwaitingToolResult => "awaiting-tool-result",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A state transition for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub agent_id: String,
    pub state: AgentPhase,
    pub timestamp: i64,
    /// Identifier of the raw event that caused this transition
    pub cause_event_id: String,
}

/// A fully assembled message for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub agent_id: String,
    pub message_id: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub timestamp: i64,
}

impl MessageEvent {
    /// Persisted form of this event
    pub fn to_stored(&self) -> super::StoredMessage {
        super::StoredMessage {
            message_id: self.message_id.clone(),
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Summary of one completed request/response cycle for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    pub agent_id: String,
    pub turn_id: String,
    /// Last assistant message assembled during the turn, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// One of the three event kinds produced by the transformation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DerivedEvent {
    State(StateEvent),
    Message(MessageEvent),
    Turn(TurnEvent),
}

impl DerivedEvent {
    /// Kind discriminant, for bus subscription filtering
    pub fn kind(&self) -> EventKind {
        match self {
            Self::State(_) => EventKind::State,
            Self::Message(_) => EventKind::Message,
            Self::Turn(_) => EventKind::Turn,
        }
    }

    /// Agent this event belongs to
    pub fn agent_id(&self) -> &str {
        match self {
            Self::State(e) => &e.agent_id,
            Self::Message(e) => &e.agent_id,
            Self::Turn(e) => &e.agent_id,
        }
    }

    /// Serialize as one line of the newline-delimited JSON wire format
    pub fn to_wire_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Discriminant of [`DerivedEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    State,
    Message,
    Turn,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Message => write!(f, "message"),
            Self::Turn => write!(f, "turn"),
        }
    }
}
