//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole assistant:
//! the gateway receives an utterance, the agent loop appends it to the
//! transcript, and the model answers with text and tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TranscriptError;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A model's request to run one tool.
///
/// Created once by the stream tokenizer or the native tool-call path and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID (the model's own id, or a generated one)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Structured arguments
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCallRequest {
    /// Create a request with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: generate_call_id(),
            name: name.into(),
            arguments,
        }
    }

    /// Identity of the call ignoring its id: the name plus the canonical
    /// (key-sorted) argument encoding.
    pub fn fingerprint(&self) -> String {
        let args = serde_json::Value::Object(self.arguments.clone());
        format!("{}:{}", self.name, args)
    }
}

/// Generate a tool call id in the `call_<hex>` shape most backends use.
pub fn generate_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content (empty for assistant messages that only call tools)
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// If this is a tool result, the tool that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message that records tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }
}

/// A conversation is an ordered, append-only sequence of messages.
///
/// The agent loop is its only writer while a turn is running. The only
/// other mutation is [`Conversation::truncate`], which rolls back to a
/// previously committed length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,

    /// Optional title (auto-generated or user-set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    /// Create an empty conversation with a known id.
    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            title: None,
        }
    }

    /// Rebuild a conversation from stored messages.
    pub fn from_messages(id: ConversationId, messages: Vec<Message>) -> Self {
        let mut conv = Self::with_id(id);
        if let Some(first) = messages.first() {
            conv.created_at = first.timestamp;
        }
        if let Some(last) = messages.last() {
            conv.updated_at = last.timestamp;
        }
        conv.messages = messages;
        conv
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Add several messages in order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.updated_at = Utc::now();
        self.messages.extend(messages);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }

    /// Check that every tool message answers a call of the assistant message
    /// directly before its run of tool messages, and that every call is answered.
    pub fn check_consistency(&self) -> std::result::Result<(), TranscriptError> {
        // (index of issuing assistant message, unanswered call ids)
        let mut pending: Option<(usize, Vec<&str>)> = None;

        for (index, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().unwrap_or_default();
                    let answered = pending
                        .as_mut()
                        .and_then(|(_, ids)| ids.iter().position(|p| *p == id).map(|pos| ids.remove(pos)));
                    if answered.is_none() {
                        return Err(TranscriptError::OrphanToolResult {
                            index,
                            tool_call_id: id.to_string(),
                        });
                    }
                }
                _ => {
                    if let Some((issuer, ids)) = pending.take()
                        && let Some(first) = ids.first()
                    {
                        return Err(TranscriptError::MissingToolResult {
                            index: issuer,
                            tool_call_id: first.to_string(),
                        });
                    }
                    if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
                        let ids = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
                        pending = Some((index, ids));
                    }
                }
            }
        }

        if let Some((issuer, ids)) = pending
            && let Some(first) = ids.first()
        {
            return Err(TranscriptError::MissingToolResult {
                index: issuer,
                tool_call_id: first.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: serde_json::Map::new(),
        }
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, Jarvis!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, Jarvis!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_links_back_to_call() {
        let msg = Message::tool_result("call_1", "calculator", "4");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("calculator"));
    }

    #[test]
    fn generated_call_ids_are_unique() {
        let a = ToolCallRequest::new("x", serde_json::Map::new());
        let b = ToolCallRequest::new("x", serde_json::Map::new());
        assert!(a.id.starts_with("call_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn fingerprint_ignores_id_and_key_order() {
        let args_a = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();
        let args_b = json!({"b": 2, "a": 1}).as_object().cloned().unwrap();
        let a = ToolCallRequest::new("calc", args_a);
        let b = ToolCallRequest::new("calc", args_b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn role_parses_from_storage_string() {
        assert_eq!("tool".parse::<Role>().unwrap(), Role::Tool);
        assert!("robot".parse::<Role>().is_err());
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message"));
        assert_eq!(conv.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn truncate_rolls_back() {
        let mut conv = Conversation::new();
        conv.push(Message::user("a"));
        conv.push(Message::assistant("b"));
        conv.truncate(1);
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages[0].content, "a");
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_with_calls("", vec![call("call_9", "weather")]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls[0].id, "call_9");
    }

    #[test]
    fn consistent_transcript_passes() {
        let mut conv = Conversation::new();
        conv.push(Message::user("weather and time?"));
        conv.push(Message::assistant_with_calls("", vec![call("c1", "weather"), call("c2", "time")]));
        conv.push(Message::tool_result("c1", "weather", "sunny"));
        conv.push(Message::tool_result("c2", "time", "noon"));
        conv.push(Message::assistant("Sunny at noon."));
        assert!(conv.check_consistency().is_ok());
    }

    #[test]
    fn dangling_call_is_reported() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hi"));
        conv.push(Message::assistant_with_calls("", vec![call("c1", "a"), call("c2", "b")]));
        conv.push(Message::tool_result("c1", "a", "ok"));
        assert_eq!(
            conv.check_consistency(),
            Err(TranscriptError::MissingToolResult { index: 1, tool_call_id: "c2".into() })
        );
    }

    #[test]
    fn orphan_result_is_reported() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hi"));
        conv.push(Message::tool_result("c1", "a", "ok"));
        assert!(matches!(
            conv.check_consistency(),
            Err(TranscriptError::OrphanToolResult { index: 1, .. })
        ));
    }

    #[test]
    fn result_for_an_older_assistant_is_orphaned() {
        let mut conv = Conversation::new();
        conv.push(Message::assistant_with_calls("", vec![call("c1", "a")]));
        conv.push(Message::tool_result("c1", "a", "ok"));
        conv.push(Message::assistant("done"));
        conv.push(Message::tool_result("c1", "a", "again"));
        assert!(matches!(
            conv.check_consistency(),
            Err(TranscriptError::OrphanToolResult { index: 3, .. })
        ));
    }

    #[test]
    fn conversation_token_estimate() {
        let mut conv = Conversation::new();
        conv.push(Message::user("12345678901234567890"));
        assert_eq!(conv.estimated_tokens(), 5);
    }
}
