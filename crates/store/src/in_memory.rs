//! In-memory session store: useful for testing and throwaway sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jarvis_core::error::SessionError;
use jarvis_core::message::{ConversationId, Message};
use jarvis_core::session::{DEFAULT_SESSION_TITLE, SessionStore, SessionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct SessionRecord {
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Monotonic touch counter; breaks ties between equal timestamps
    touched: u64,
    messages: Vec<Message>,
}

impl SessionRecord {
    fn summary(&self, id: &ConversationId) -> SessionSummary {
        SessionSummary {
            id: id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }
}

#[derive(Default)]
struct State {
    sessions: HashMap<ConversationId, SessionRecord>,
    clock: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// A session store that keeps everything in process memory.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_session(&self, title: Option<&str>) -> Result<ConversationId, SessionError> {
        let id = ConversationId::new();
        let now = Utc::now();
        let mut state = self.state.write().await;
        let touched = state.tick();
        state.sessions.insert(
            id.clone(),
            SessionRecord {
                title: title.unwrap_or(DEFAULT_SESSION_TITLE).to_string(),
                created_at: now,
                updated_at: now,
                touched,
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn get_session(&self, id: &ConversationId) -> Result<Option<SessionSummary>, SessionError> {
        let state = self.state.read().await;
        Ok(state.sessions.get(id).map(|r| r.summary(id)))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state.sessions.iter().collect();
        records.sort_by(|(_, a), (_, b)| b.touched.cmp(&a.touched));
        Ok(records.into_iter().map(|(id, r)| r.summary(id)).collect())
    }

    async fn append_messages(&self, id: &ConversationId, messages: &[Message]) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let touched = state.tick();
        let record = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        record.messages.extend_from_slice(messages);
        record.updated_at = Utc::now();
        record.touched = touched;
        Ok(())
    }

    async fn load_messages(&self, id: &ConversationId) -> Result<Vec<Message>, SessionError> {
        let state = self.state.read().await;
        state
            .sessions
            .get(id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    async fn rename_session(&self, id: &ConversationId, title: &str) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let record = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        record.title = title.to_string();
        Ok(())
    }

    async fn delete_session(&self, id: &ConversationId) -> Result<bool, SessionError> {
        Ok(self.state.write().await.sessions.remove(id).is_some())
    }
}
