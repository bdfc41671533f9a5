//! Explicit analysis runs
//!
//! POST /analyze       - `{file_path, query?, session_id?}`
//! POST /analyze-path  - same body, kept for older clients
//!
//! The same session, file and query within the run-guard window launch once.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use turnstream_core::StageContext;
use turnstream_turns::{new_session_id, start_key};

use crate::server::AppState;

/// Analysis request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Analysis reply; `code` 0 means accepted
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> (StatusCode, Json<AnalyzeResponse>) {
    if request.file_path.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AnalyzeResponse {
                code: 1,
                msg: "file_path is required".to_string(),
                session_id: None,
            }),
        );
    }

    let session_id = request
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| new_session_id(&state.config.turns.session_prefix));

    let key = start_key(&session_id, &request.file_path, &request.query);
    if state.run_guard.should_suppress_start(&key) {
        debug!(session_id = %session_id, "Duplicate analyze call ignored");
        return (
            StatusCode::OK,
            Json(AnalyzeResponse {
                code: 0,
                msg: "duplicate_ignored".to_string(),
                session_id: Some(session_id),
            }),
        );
    }

    info!(session_id = %session_id, file_path = %request.file_path, "Analysis requested");
    let mut ctx = StageContext::new(session_id.clone(), request.file_path, request.query);
    ctx.params = request.params;
    state.launch(ctx);

    (
        StatusCode::OK,
        Json(AnalyzeResponse {
            code: 0,
            msg: "started".to_string(),
            session_id: Some(session_id),
        }),
    )
}

/// Analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/analyze-path", post(analyze))
}
