//! HTTP API v1: sessions and tools.
//!
//! Endpoints:
//!
//! - `GET    /v1/sessions`               — List sessions, most recent first
//! - `POST   /v1/sessions`               — Create a session
//! - `GET    /v1/sessions/{id}/messages` — A session's transcript
//! - `PATCH  /v1/sessions/{id}`          — Rename a session
//! - `DELETE /v1/sessions/{id}`          — Delete a session
//! - `GET    /v1/tools`                  — List available tools

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use jarvis_core::error::SessionError;
use jarvis_core::message::{ConversationId, Message, ToolCallRequest};
use jarvis_core::session::SessionSummary;

use crate::SharedState;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route(
            "/sessions/{id}",
            axum::routing::patch(rename_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/{id}/messages", get(list_messages_handler))
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDto {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
}

impl From<SessionSummary> for SessionDto {
    fn from(s: SessionSummary) -> Self {
        Self {
            id: s.id.to_string(),
            title: s.title,
            created_at: s.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
            message_count: s.message_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionDto>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    pub title: String,
}

/// One transcript entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: String,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
            tool_calls: m.tool_calls.clone(),
            tool_call_id: m.tool_call_id.clone(),
            name: m.name.clone(),
            timestamp: m.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub session_id: String,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error(e: SessionError) -> ApiError {
    match e {
        SessionError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        other => {
            warn!(error = %other, "Session store request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn list_sessions_handler(
    State(state): State<SharedState>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions: Vec<SessionDto> = state
        .store()
        .list_sessions()
        .await
        .map_err(store_error)?
        .into_iter()
        .map(SessionDto::from)
        .collect();
    let count = sessions.len();
    Ok(Json(SessionListResponse { sessions, count }))
}

/// The body is optional; an empty one creates an untitled session.
async fn create_session_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionDto>), ApiError> {
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid body: {e}")))?
    };
    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let store = state.store();
    let id = store.create_session(title).await.map_err(store_error)?;
    let summary = store
        .get_session(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Session vanished"))?;

    info!(session_id = %id, "Session created");
    Ok((StatusCode::CREATED, Json(summary.into())))
}

async fn list_messages_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let id = ConversationId::from(id);
    let messages = state.store().load_messages(&id).await.map_err(store_error)?;
    Ok(Json(MessageListResponse {
        session_id: id.to_string(),
        messages: messages.iter().map(MessageDto::from).collect(),
    }))
}

async fn rename_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<RenameSessionRequest>,
) -> Result<Json<SessionDto>, ApiError> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Title must not be empty"));
    }

    let id = ConversationId::from(id);
    let store = state.store();
    store.rename_session(&id, title).await.map_err(store_error)?;
    let summary = store
        .get_session(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Session not found: {id}")))?;
    Ok(Json(summary.into()))
}

async fn delete_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = ConversationId::from(id);
    if state.store().delete_session(&id).await.map_err(store_error)? {
        info!(session_id = %id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("Session not found: {id}")))
    }
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let defs = state.tools().definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::state_with;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use jarvis_agent::test_helpers::ScriptedProvider;
    use jarvis_core::session::DEFAULT_SESSION_TITLE;
    use tower::ServiceExt;

    fn state() -> SharedState {
        state_with(ScriptedProvider::replies(&[]))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn list_tools() {
        let app = v1_router(state());

        let req = Request::builder().uri("/tools").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: ToolListResponse = body_json(response).await;
        assert_eq!(json.count, 1);
        assert_eq!(json.tools[0].name, "fast");
    }

    #[tokio::test]
    async fn create_and_list_sessions() {
        let state = state();

        let req = Request::builder()
            .method("POST")
            .uri("/sessions")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: SessionDto = body_json(response).await;
        assert_eq!(created.title, DEFAULT_SESSION_TITLE);

        let req = Request::builder()
            .method("POST")
            .uri("/sessions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"Groceries"}"#))
            .unwrap();
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        let titled: SessionDto = body_json(response).await;
        assert_eq!(titled.title, "Groceries");

        let req = Request::builder().uri("/sessions").body(Body::empty()).unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list: SessionListResponse = body_json(response).await;
        assert_eq!(list.count, 2);
        assert_eq!(list.sessions[0].id, titled.id);
    }

    #[tokio::test]
    async fn create_rejects_bad_json() {
        let req = Request::builder()
            .method("POST")
            .uri("/sessions")
            .body(Body::from("{not json"))
            .unwrap();
        let response = v1_router(state()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn messages_of_a_session() {
        let state = state();
        let id = state.store().create_session(None).await.unwrap();
        state.store().append_message(&id, &Message::user("hello")).await.unwrap();
        state
            .store()
            .append_message(&id, &Message::assistant("hi there"))
            .await
            .unwrap();

        let req = Request::builder()
            .uri(format!("/sessions/{id}/messages"))
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: MessageListResponse = body_json(response).await;
        assert_eq!(json.messages.len(), 2);
        assert_eq!(json.messages[0].role, "user");
        assert_eq!(json.messages[1].content, "hi there");
    }

    #[tokio::test]
    async fn messages_of_unknown_session_is_404() {
        let req = Request::builder()
            .uri("/sessions/nonexistent/messages")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rename_session() {
        let state = state();
        let id = state.store().create_session(None).await.unwrap();

        let req = Request::builder()
            .method("PATCH")
            .uri(format!("/sessions/{id}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"Trip planning"}"#))
            .unwrap();
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: SessionDto = body_json(response).await;
        assert_eq!(json.title, "Trip planning");

        let req = Request::builder()
            .method("PATCH")
            .uri(format!("/sessions/{id}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"   "}"#))
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_session() {
        let state = state();
        let id = state.store().create_session(None).await.unwrap();

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
