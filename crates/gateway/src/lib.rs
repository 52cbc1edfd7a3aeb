//! Network gateway for Jarvis.
//!
//! Serves the voice/chat WebSocket at `/ws`, session and tool listings
//! under `/v1`, and a health check. Built on Axum.

pub mod api_v1;
pub mod ws;

use axum::{Router, http::Method, http::header, response::Json, routing::get};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use jarvis_agent::{AgentLoop, SessionRunner};
use jarvis_config::AppConfig;
use jarvis_core::message::ConversationId;
use jarvis_core::session::SessionStore;
use jarvis_core::tool::ToolRegistry;
use jarvis_voice::VoiceServices;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runner: Arc<SessionRunner>,
    pub voice: VoiceServices,
    /// Language passed to speech services when the client sends none
    pub default_language: Option<String>,
    busy: Arc<Mutex<HashSet<ConversationId>>>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(runner: Arc<SessionRunner>, voice: VoiceServices) -> Self {
        Self {
            runner,
            voice,
            default_language: None,
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_default_language(mut self, language: Option<String>) -> Self {
        self.default_language = language;
        self
    }

    /// Build the provider, tools, store and voice services from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let provider = jarvis_providers::build_from_config(&config.llm);
        let tools = Arc::new(jarvis_tools::default_registry(&config.tools)?);
        let store = jarvis_store::open(&config.storage).await?;
        info!(
            provider = provider.name(),
            store = store.name(),
            tools = tools.len(),
            "Gateway subsystems ready"
        );

        let agent = Arc::new(AgentLoop::from_config(provider, tools, config));
        let runner = Arc::new(SessionRunner::new(agent, store));
        let voice = jarvis_voice::build_from_config(&config.voice);
        Ok(Self::new(runner, voice).with_default_language(config.voice.default_language.clone()))
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.runner.store()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        self.runner.agent().tools()
    }

    /// Reserve `session` for one turn. `None` while another turn holds it.
    pub(crate) fn claim(&self, session: &ConversationId) -> Option<TurnClaim> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(session.clone()) {
            return None;
        }
        Some(TurnClaim {
            busy: self.busy.clone(),
            session: session.clone(),
        })
    }
}

/// Held for the lifetime of a turn; releases the session on drop.
pub(crate) struct TurnClaim {
    busy: Arc<Mutex<HashSet<ConversationId>>>,
    session: ConversationId,
}

impl Drop for TurnClaim {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session);
    }
}

/// Build the full router: health, WebSocket and the v1 API.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .merge(ws::ws_router(state.clone()))
        .nest("/v1", api_v1::v1_router(state))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config).await?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use jarvis_agent::test_helpers::{ScriptedProvider, SlowTool};
    use jarvis_store::InMemoryStore;
    use std::time::Duration;

    pub fn state_with(provider: ScriptedProvider) -> SharedState {
        state_with_voice(provider, VoiceServices::disabled())
    }

    pub fn state_with_voice(provider: ScriptedProvider, voice: VoiceServices) -> SharedState {
        state_watching(Arc::new(provider), voice)
    }

    /// Like [`state_with_voice`], keeping a handle on the provider so tests
    /// can inspect the requests it received.
    pub fn state_watching(provider: Arc<ScriptedProvider>, voice: VoiceServices) -> SharedState {
        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(SlowTool::new("fast", Duration::from_millis(1))))
            .unwrap();
        let agent = AgentLoop::new(provider, Arc::new(registry), "mock");
        let runner = SessionRunner::new(Arc::new(agent), Arc::new(InMemoryStore::new()));
        Arc::new(GatewayState::new(Arc::new(runner), voice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use jarvis_agent::test_helpers::ScriptedProvider;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_support::state_with(ScriptedProvider::replies(&[])));

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn v1_routes_are_nested() {
        let app = build_router(test_support::state_with(ScriptedProvider::replies(&[])));

        let req = Request::builder().uri("/v1/tools").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn claims_are_exclusive_per_session() {
        let state = test_support::state_with(ScriptedProvider::replies(&[]));
        let a = ConversationId::from("a");
        let first = state.claim(&a).unwrap();
        assert!(state.claim(&a).is_none());
        assert!(state.claim(&ConversationId::from("b")).is_some());
        drop(first);
        assert!(state.claim(&a).is_some());
    }
}
