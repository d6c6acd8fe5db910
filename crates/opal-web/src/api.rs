//! REST API route handlers.
//!
//! Sessions are plain CRUD against the store; task submission is
//! fire-and-forget (the run executes on a detached task and streams its
//! events over SSE), and cancellation flips the owning session's cancel
//! signal.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use opal_agent::TaskInput;
use opal_store::Attachment;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Response payload for the `/api/status` endpoint.
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Return basic system status information.
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Create a session; responds with `{ "session_id": … }`.
pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.coordinator.get_session("").await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(json!({ "session_id": session.id })),
        ),
        Err(e) => internal_error(e),
    }
}

/// List all sessions.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.coordinator.store().list().await {
        Ok(sessions) => (StatusCode::OK, Json(json!({ "sessions": sessions }))),
        Err(e) => internal_error(e),
    }
}

/// Delete a session and all its state.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.delete_session(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "deleted": id }))),
        Err(opal_agent::AgentError::Store(opal_store::StoreError::NotFound { .. })) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("session not found: {id}") })),
        ),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Request body for task submission.
#[derive(Deserialize)]
pub struct TaskBody {
    /// The session to run in; empty or absent creates one.
    #[serde(default)]
    pub session_id: String,
    /// The task text.
    pub task: String,
    /// Attachments uploaded with the task.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Submit a task; responds immediately with `{ task_id, session_id }` while
/// the run executes in the background.
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TaskBody>,
) -> impl IntoResponse {
    let session = match state.coordinator.get_session(&body.session_id).await {
        Ok(session) => session,
        Err(e) => return internal_error(e),
    };

    let task_id = Uuid::now_v7().to_string();
    state.tasks.insert(task_id.clone(), session.id.clone());

    let coordinator = Arc::clone(&state.coordinator);
    let state_bg = Arc::clone(&state);
    let session_id = session.id.clone();
    let bg_task_id = task_id.clone();
    tokio::spawn(async move {
        let input = TaskInput {
            task: body.task,
            attachments: body.attachments,
        };
        if let Err(e) = coordinator.execute_task(&session_id, input).await {
            tracing::error!(task_id = %bg_task_id, error = %e, "task run failed");
        }
        state_bg.tasks.remove(&bg_task_id);
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "task_id": task_id, "session_id": session.id })),
    )
}

/// Cancel a running task by id.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(entry) = state.tasks.get(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("task not found: {id}") })),
        );
    };

    state.coordinator.store().set_cancel(entry.value());
    (StatusCode::OK, Json(json!({ "cancelled": id })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
