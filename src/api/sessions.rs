//! Sessions API endpoints
//!
//! POST   /api/v1/sessions/:id/events - Record an event from an external stage
//! GET    /api/v1/sessions/:id/events - In-memory log of a session
//! DELETE /api/v1/sessions/:id        - Purge a session and its durable trace

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use turnstream_core::Event;

use super::ApiResponse;
use crate::server::stages::fields_from_value;
use crate::server::AppState;

const EXTERNAL_NODE: &str = "external";

/// Purge result
#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    /// The session was held in memory
    pub existed: bool,
}

/// Record one event.
async fn record_event(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<ApiResponse<Event>>) {
    if !body.is_object() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("event must be a JSON object")),
        );
    }
    let node = body
        .get("node")
        .and_then(Value::as_str)
        .unwrap_or(EXTERNAL_NODE)
        .to_string();
    let step_type = body
        .get("step_type")
        .and_then(Value::as_str)
        .unwrap_or("trace")
        .to_string();

    let event = state
        .bus
        .record(&session_id, &node, &step_type, fields_from_value(&body));
    (StatusCode::OK, Json(ApiResponse::success(event)))
}

/// Get the in-memory log.
async fn list_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<Vec<Event>>>) {
    if !state.bus.contains(&session_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("unknown session: {session_id}"))),
        );
    }
    (StatusCode::OK, Json(ApiResponse::success(state.bus.log(&session_id))))
}

/// Delete a session and everything stored for it.
async fn purge_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse<PurgeResponse>> {
    let existed = state.bus.purge(&session_id).await;
    state.uploads.forget(&session_id);
    info!(session_id = %session_id, existed, "Session purged");
    Json(ApiResponse::success(PurgeResponse { existed }))
}

/// Session routes
pub fn sessions_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/sessions/:id/events",
            get(list_events).post(record_event),
        )
        .route("/api/v1/sessions/:id", delete(purge_session))
}
