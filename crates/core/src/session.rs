//! Session store trait: the long-term home of conversation transcripts.
//!
//! The agent loop rebuilds its working transcript from the store at the start
//! of every turn and appends only what the turn committed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::{ConversationId, Message};

/// Title given to sessions until the first user message names them.
pub const DEFAULT_SESSION_TITLE: &str = "New Conversation";

/// Listing entry for one stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
}

/// The core SessionStore trait.
///
/// Implementations: SQLite and in-memory.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Create a session and return its id.
    async fn create_session(&self, title: Option<&str>) -> std::result::Result<ConversationId, SessionError>;

    /// Fetch one session's summary.
    async fn get_session(
        &self,
        id: &ConversationId,
    ) -> std::result::Result<Option<SessionSummary>, SessionError>;

    /// All sessions, most recently updated first.
    async fn list_sessions(&self) -> std::result::Result<Vec<SessionSummary>, SessionError>;

    /// Append messages atomically and bump the session's `updated_at`.
    /// Either every message is stored or none is.
    async fn append_messages(
        &self,
        id: &ConversationId,
        messages: &[Message],
    ) -> std::result::Result<(), SessionError>;

    /// Append a single message.
    async fn append_message(
        &self,
        id: &ConversationId,
        message: &Message,
    ) -> std::result::Result<(), SessionError> {
        self.append_messages(id, std::slice::from_ref(message)).await
    }

    /// All messages of a session, in insertion order.
    async fn load_messages(&self, id: &ConversationId) -> std::result::Result<Vec<Message>, SessionError>;

    /// Change a session's title.
    async fn rename_session(&self, id: &ConversationId, title: &str) -> std::result::Result<(), SessionError>;

    /// Delete a session and its messages. Returns whether it existed.
    async fn delete_session(&self, id: &ConversationId) -> std::result::Result<bool, SessionError>;
}

/// Derive a session title from the first user utterance.
pub fn title_from_utterance(text: &str) -> String {
    const MAX_CHARS: usize = 50;
    let text = text.trim();
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let mut title: String = text.chars().take(MAX_CHARS).collect();
    title.push_str("...");
    title
}
