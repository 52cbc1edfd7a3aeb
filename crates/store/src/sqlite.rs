//! SQLite session store.
//!
//! Two tables:
//! - `sessions` holds one row per conversation (title and timestamps)
//! - `messages` holds the transcript, ordered by an autoincrement key
//!
//! Deleting a session cascades to its messages.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use jarvis_core::error::SessionError;
use jarvis_core::message::{ConversationId, Message, Role, ToolCallRequest};
use jarvis_core::session::{DEFAULT_SESSION_TITLE, SessionStore, SessionSummary};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    ///
    /// Accepts `sqlite://file.db` URLs or `sqlite::memory:` for an ephemeral
    /// database.
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // Every connection to `:memory:` sees its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite session store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SessionError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY NOT NULL,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                activity    INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL,
                session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role          TEXT NOT NULL,
                content       TEXT NOT NULL,
                tool_calls    TEXT NOT NULL DEFAULT '[]',
                tool_call_id  TEXT,
                name          TEXT,
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, iid)")
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<SessionSummary, SessionError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| SessionError::QueryFailed(format!("id column: {e}")))?;
        let title: String = row
            .try_get("title")
            .map_err(|e| SessionError::QueryFailed(format!("title column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| SessionError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| SessionError::QueryFailed(format!("updated_at column: {e}")))?;
        let message_count: i64 = row.try_get("message_count").unwrap_or(0);

        Ok(SessionSummary {
            id: ConversationId(id),
            title,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
            message_count: message_count.max(0) as usize,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, SessionError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| SessionError::QueryFailed(format!("id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| SessionError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| SessionError::QueryFailed(format!("content column: {e}")))?;
        let tool_calls_json: String = row
            .try_get("tool_calls")
            .map_err(|e| SessionError::QueryFailed(format!("tool_calls column: {e}")))?;
        let tool_call_id: Option<String> = row
            .try_get("tool_call_id")
            .map_err(|e| SessionError::QueryFailed(format!("tool_call_id column: {e}")))?;
        let name: Option<String> = row
            .try_get("name")
            .map_err(|e| SessionError::QueryFailed(format!("name column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| SessionError::QueryFailed(format!("created_at column: {e}")))?;

        let role = Role::from_str(&role).map_err(SessionError::QueryFailed)?;
        let tool_calls: Vec<ToolCallRequest> = serde_json::from_str(&tool_calls_json)
            .unwrap_or_else(|e| {
                warn!(message_id = %id, error = %e, "Dropping unreadable stored tool calls");
                Vec::new()
            });

        Ok(Message {
            id,
            role,
            content,
            tool_calls,
            tool_call_id,
            name,
            timestamp: parse_timestamp(&created_at),
        })
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const SUMMARY_COLUMNS: &str = r#"
    s.id, s.title, s.created_at, s.updated_at,
    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count
"#;

const NEXT_ACTIVITY: &str = "(SELECT COALESCE(MAX(activity), 0) + 1 FROM sessions)";

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, title: Option<&str>) -> Result<ConversationId, SessionError> {
        let id = ConversationId::new();
        let now = format_timestamp(Utc::now());

        sqlx::query(&format!(
            "INSERT INTO sessions (id, title, created_at, updated_at, activity) VALUES (?, ?, ?, ?, {NEXT_ACTIVITY})"
        ))
        .bind(id.as_str())
        .bind(title.unwrap_or(DEFAULT_SESSION_TITLE))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::QueryFailed(format!("Create session failed: {e}")))?;

        debug!(session_id = %id, "Created session");
        Ok(id)
    }

    async fn get_session(&self, id: &ConversationId) -> Result<Option<SessionSummary>, SessionError> {
        let row = sqlx::query(&format!("SELECT {SUMMARY_COLUMNS} FROM sessions s WHERE s.id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::QueryFailed(format!("Get session failed: {e}")))?;

        row.as_ref().map(Self::row_to_summary).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM sessions s ORDER BY s.activity DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::QueryFailed(format!("List sessions failed: {e}")))?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn append_messages(&self, id: &ConversationId, messages: &[Message]) -> Result<(), SessionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SessionError::Storage(format!("Begin transaction failed: {e}")))?;

        let updated = sqlx::query(&format!(
            "UPDATE sessions SET updated_at = ?, activity = {NEXT_ACTIVITY} WHERE id = ?"
        ))
        .bind(format_timestamp(Utc::now()))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| SessionError::QueryFailed(format!("Touch session failed: {e}")))?;

        if updated.rows_affected() == 0 {
            return Err(SessionError::NotFound(id.to_string()));
        }

        for message in messages {
            let tool_calls = serde_json::to_string(&message.tool_calls)
                .map_err(|e| SessionError::Storage(format!("Serialize tool calls: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO messages (id, session_id, role, content, tool_calls, tool_call_id, name, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&message.id)
            .bind(id.as_str())
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(&tool_calls)
            .bind(&message.tool_call_id)
            .bind(&message.name)
            .bind(format_timestamp(message.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::QueryFailed(format!("Insert message failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| SessionError::Storage(format!("Commit failed: {e}")))?;
        Ok(())
    }

    async fn load_messages(&self, id: &ConversationId) -> Result<Vec<Message>, SessionError> {
        if self.get_session(id).await?.is_none() {
            return Err(SessionError::NotFound(id.to_string()));
        }

        let rows = sqlx::query(
            r#"
            SELECT id, role, content, tool_calls, tool_call_id, name, created_at
            FROM messages WHERE session_id = ? ORDER BY iid ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::QueryFailed(format!("Load messages failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn rename_session(&self, id: &ConversationId, title: &str) -> Result<(), SessionError> {
        let result = sqlx::query("UPDATE sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::QueryFailed(format!("Rename failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_session(&self, id: &ConversationId) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::QueryFailed(format!("Delete failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
