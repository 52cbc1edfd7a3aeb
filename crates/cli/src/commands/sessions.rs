//! `jarvis sessions` — Inspect stored sessions.

use jarvis_core::message::ConversationId;
use std::path::Path;

use super::one_line;

pub async fn list(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let store = jarvis_store::open(&config.storage).await?;
    let sessions = store.list_sessions().await?;

    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }

    println!("{:<38} {:>5}  {:<17} TITLE", "ID", "MSGS", "UPDATED");
    for s in sessions {
        println!(
            "{:<38} {:>5}  {:<17} {}",
            s.id,
            s.message_count,
            s.updated_at.format("%Y-%m-%d %H:%M"),
            one_line(&s.title, 50)
        );
    }

    Ok(())
}

pub async fn delete(config_path: Option<&Path>, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let store = jarvis_store::open(&config.storage).await?;

    if store.delete_session(&ConversationId::from(id)).await? {
        tracing::info!(session_id = %id, "Session deleted");
        println!("Deleted session {id}");
        Ok(())
    } else {
        Err(format!("No session with id {id}").into())
    }
}
