//! Tool call records accumulated over a turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call observed during a turn, paired with its result once available
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool being called
    pub name: String,
    /// Arguments passed to the tool (as JSON)
    pub arguments: Value,
    /// Result returned by the tool, if it has completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Whether the tool reported failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallRecord {
    /// Create a record for a tool call that has not yet completed
    pub fn pending(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            result: None,
            is_error: false,
        }
    }

    /// Attach the tool's result to this record
    pub fn complete(&mut self, result: Value, is_error: bool) {
        self.result = Some(result);
        self.is_error = is_error;
    }
}
