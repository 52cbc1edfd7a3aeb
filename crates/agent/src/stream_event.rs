//! Agent-level streaming events.
//!
//! One turn yields an ordered sequence of these. The gateway maps each
//! variant onto a transport message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Visible reply text, forwarded as it streams in.
    Response { text: String },

    /// A closed reasoning span.
    Thought { text: String },

    /// The model requested a tool.
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    /// A tool finished (successfully or with an `"Error: "` result).
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
    },

    /// The turn failed.
    Error { message: String },
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
        }
    }
}
