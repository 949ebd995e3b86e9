//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST   /v1/chat`               Send a message, wait for the answer
//! - `POST   /v1/chat/workflow`      Send a message, get an SSE stream of run events
//! - `GET    /v1/chat/{session_id}`  Conversation history of a session
//! - `DELETE /v1/chat/{session_id}`  Clear a session
//! - `GET    /v1/tools`              List available tools
//! - `GET    /v1/events`             SSE stream of every event on the bus

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use deskloop_agent::{FAILURE_MESSAGE, RunDriver, TerminationReason};
use deskloop_core::event::Event;
use deskloop_core::message::{SessionKey, Turn};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub driver: RunDriver,
}

impl ApiV1State {
    pub fn new(driver: RunDriver) -> Self {
        Self { driver }
    }
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/workflow", post(workflow_handler))
        .route(
            "/chat/{session_id}",
            get(get_session_handler).delete(clear_session_handler),
        )
        .route("/tools", get(list_tools_handler))
        .route("/events", get(event_log_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    /// Existing session (omit to start a new one).
    #[serde(default)]
    session_id: Option<String>,
}

impl ChatRequest {
    fn session(&self) -> SessionKey {
        match self.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => SessionKey::from(id),
            _ => SessionKey::generate(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ChatResponse {
    message: String,
    session_id: String,
    iteration: usize,
    termination_reason: TerminationReason,
    tool_calls: usize,
}

#[derive(Serialize, Deserialize)]
struct HistoryResponse {
    session_id: String,
    history: Vec<Turn>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct StatusResponse {
    status: String,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct ToolDto {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, session: Option<&SessionKey>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            session_id: session.map(|s| s.to_string()),
        }),
    )
}

fn require_message(payload: &ChatRequest) -> Result<(), ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty", None));
    }
    Ok(())
}

fn to_sse(event: Arc<Event>) -> Result<SseEvent, Infallible> {
    Ok(SseEvent::default().event(event.kind.as_str()).data(event.to_json()))
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/chat`: run to completion and return the final answer.
async fn chat_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    require_message(&payload)?;
    let session = payload.session();
    info!(session = %session, "v1/chat request");

    match state.driver.run(session.clone(), payload.message).await {
        Ok(outcome) => Ok(Json(ChatResponse {
            message: outcome.answer,
            session_id: session.to_string(),
            iteration: outcome.iterations,
            termination_reason: outcome.termination_reason,
            tool_calls: outcome.tool_calls,
        })),
        Err(e) => {
            error!(session = %session, error = %e, "v1/chat run failed");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                FAILURE_MESSAGE,
                Some(&session),
            ))
        }
    }
}

/// `POST /v1/chat/workflow`: one SSE frame per run event, ending with
/// `run_done` or `run_error`.
///
/// The run is not tied to the connection; a client that disconnects early
/// leaves it to finish and commit its history.
async fn workflow_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    require_message(&payload)?;
    let session = payload.session();
    info!(session = %session, "v1/chat/workflow SSE request");

    let stream = state.driver.stream(session, payload.message);
    Ok(Sse::new(stream.into_stream().map(to_sse)))
}

async fn get_session_handler(
    State(state): State<SharedApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session = SessionKey::from(session_id);
    let history = state
        .driver
        .execution()
        .store()
        .get(&session)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&session)))?;

    if history.is_empty() {
        return Err(api_error(StatusCode::NOT_FOUND, "Session not found", Some(&session)));
    }

    let count = history.len();
    Ok(Json(HistoryResponse {
        session_id: session.to_string(),
        history: history.turns,
        count,
    }))
}

async fn clear_session_handler(
    State(state): State<SharedApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = SessionKey::from(session_id);
    let existed = state
        .driver
        .execution()
        .store()
        .clear(&session)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&session)))?;
    info!(session = %session, existed, "Session cleared");

    Ok(Json(StatusResponse {
        status: "success".into(),
        message: "Session cleared".into(),
    }))
}

async fn list_tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let defs = state.driver.execution().tools().definitions();
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

/// `GET /v1/events`: every event published on the bus, from all runs.
async fn event_log_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.driver.event_bus().subscribe();
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        subscription.recv().await.map(|event| (event, subscription))
    });
    Sse::new(stream.map(to_sse))
}

// ── Tests ─────────────────────────────────────────────────────────────────
