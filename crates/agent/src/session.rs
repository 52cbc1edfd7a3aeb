//! Store-backed turns: load the transcript, run the loop, persist the delta.

use jarvis_core::error::SessionError;
use jarvis_core::message::{Conversation, ConversationId, Role};
use jarvis_core::session::{DEFAULT_SESSION_TITLE, SessionStore, title_from_utterance};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::TurnContext;
use crate::loop_runner::{AgentLoop, TurnOutcome};
use crate::stream_event::StreamEvent;

/// What a stored turn did, beyond the events it streamed.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// The final assistant reply, for completed turns
    pub reply: Option<String>,
    /// Set when this turn gave the session its title
    pub new_title: Option<String>,
    /// Messages appended to the store
    pub persisted: usize,
}

pub struct SessionRunner {
    agent: Arc<AgentLoop>,
    store: Arc<dyn SessionStore>,
}

impl SessionRunner {
    pub fn new(agent: Arc<AgentLoop>, store: Arc<dyn SessionStore>) -> Self {
        Self { agent, store }
    }

    pub fn agent(&self) -> &Arc<AgentLoop> {
        &self.agent
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Run one turn on a stored session. Only messages the loop committed
    /// are written back, in a single append. A completed turn names an
    /// untitled session after its input.
    pub async fn run_turn(
        &self,
        session_id: &ConversationId,
        input: &str,
        cancel: &CancellationToken,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<TurnReport, SessionError> {
        self.run_turn_in(session_id, input, &TurnContext::default(), cancel, events)
            .await
    }

    /// [`run_turn`](Self::run_turn) for a user whose location is known.
    pub async fn run_turn_in(
        &self,
        session_id: &ConversationId,
        input: &str,
        context: &TurnContext,
        cancel: &CancellationToken,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<TurnReport, SessionError> {
        let summary = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let history = self.store.load_messages(session_id).await?;
        let mut conversation = Conversation::from_messages(session_id.clone(), history);
        let loaded = conversation.len();

        let outcome = self.agent
            .run_turn_in(&mut conversation, input, context, cancel, events).await;

        let delta = conversation.messages.get(loaded..).unwrap_or_default();
        self.store.append_messages(session_id, delta).await?;
        debug!(session_id = %session_id, persisted = delta.len(), ?outcome, "Turn persisted");

        let titled = outcome == TurnOutcome::Completed
            && summary.title == DEFAULT_SESSION_TITLE
            && !input.trim().is_empty();
        let new_title = if titled {
            let title = title_from_utterance(input);
            self.store.rename_session(session_id, &title).await?;
            Some(title)
        } else {
            None
        };

        let reply = match outcome {
            TurnOutcome::Completed => conversation
                .messages
                .last()
                .filter(|m| m.role == Role::Assistant)
                .map(|m| m.content.clone()),
            _ => None,
        };

        Ok(TurnReport {
            outcome,
            reply,
            new_title,
            persisted: delta.len(),
        })
    }
}
