//! HTTP gateway for agentd.
//!
//! A thin shell over the engine's typed operations:
//!
//! - `POST   /api/v1/sessions/`      — create a session
//! - `GET    /api/v1/sessions/`      — list (`?source=memory|file|all`)
//! - `GET    /api/v1/sessions/{id}`  — fetch one
//! - `PUT    /api/v1/sessions/{id}`  — update mutable fields
//! - `DELETE /api/v1/sessions/{id}`  — delete
//! - `POST   /api/v1/chat/completions` — run a turn (JSON or SSE)
//! - `GET    /health`, `GET /api/v1/chat/health`
//!
//! When `stream=true` each turn event is one SSE record
//! (`data: <json>\n\n`) and the stream terminates with `data: [DONE]`.
//!
//! Built on Axum; transport concerns only, no engine logic.

use agentd_agent::TurnEvent;
use agentd_core::error::Error;
use agentd_core::session::{ListSource, SessionSpec, SessionSummary};
use agentd_session::{SessionManager, SessionUpdate};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for the gateway.
pub struct GatewayState {
    pub sessions: Arc<SessionManager>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the gateway router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/chat/health", get(chat_health_handler))
        .route("/api/v1/chat/completions", post(chat_completions_handler))
        .route(
            "/api/v1/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route(
            "/api/v1/sessions/",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route(
            "/api/v1/sessions/{id}",
            get(get_session_handler)
                .put(update_session_handler)
                .delete(delete_session_handler),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: SharedState, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);

    info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

// ── Error mapping ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::Busy(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ── Health ────────────────────────────────────────────────────────────

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chat_health_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let stats = state.sessions.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat",
        "active_sessions": stats.live_sessions,
    }))
}

// ── Sessions ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
    count: usize,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    source: Option<String>,
}

async fn create_session_handler(
    State(state): State<SharedState>,
    Json(spec): Json<SessionSpec>,
) -> Result<(StatusCode, Json<agentd_core::session::SessionConfig>), ApiError> {
    let config = state.sessions.create(spec).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn list_sessions_handler(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let source = match query.source.as_deref() {
        Some(raw) => raw.parse::<ListSource>()?,
        None => ListSource::All,
    };
    let sessions = state.sessions.list(source).await?;
    let count = sessions.len();
    Ok(Json(SessionListResponse { sessions, count }))
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<agentd_core::session::SessionConfig>, ApiError> {
    Ok(Json(state.sessions.get(&id).await?))
}

async fn update_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(update): Json<SessionUpdate>,
) -> Result<Json<agentd_core::session::SessionConfig>, ApiError> {
    Ok(Json(state.sessions.update(&id, update).await?))
}

async fn delete_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ── Chat ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    max_iterations: Option<u32>,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,
    message: String,
    response: String,
}

async fn chat_completions_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    info!(session = %payload.session_id, stream = payload.stream, "chat request");

    let rx = state
        .sessions
        .run(
            &payload.session_id,
            payload.message.clone(),
            payload.max_iterations,
            CancellationToken::new(),
        )
        .await?;

    if payload.stream {
        return Ok(Sse::new(event_stream(rx)).into_response());
    }

    // Non-streaming: drain the turn and answer with the final text.
    let mut rx = rx;
    let mut final_response = String::new();
    let mut turn_error: Option<String> = None;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Complete { final_response: text, .. } => final_response = text,
            TurnEvent::Error { error } => turn_error = Some(error),
            _ => {}
        }
    }

    if let Some(error) = turn_error {
        return Err(ApiError(Error::Internal(error)));
    }

    Ok(Json(ChatResponse {
        session_id: payload.session_id,
        message: payload.message,
        response: final_response,
    })
    .into_response())
}

/// One SSE record per turn event, terminated by `data: [DONE]`.
fn event_stream(
    rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    ReceiverStream::new(rx)
        .map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok(SseEvent::default().data(data))
        })
        .chain(stream::once(async {
            Ok(SseEvent::default().data("[DONE]"))
        }))
}
