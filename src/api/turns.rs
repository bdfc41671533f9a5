//! Chat turn endpoint
//!
//! POST /api/v1/turns - a chat-style request body (one phase of a turn)
//!
//! Both phases of a user turn resolve to the same session through the turn
//! fingerprint; only the first one launches the pipeline. File names the
//! turn mentions are resolved to stored upload keys before that decision.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use turnstream_core::StageContext;
use turnstream_replay::drain_short;
use turnstream_turns::{fingerprint, start_key, time_bucket, TurnRequest};

use crate::server::AppState;

/// Reply when neither the request nor the configuration names an input file
pub const MISSING_FILE_MESSAGE: &str = "No input file was given. Upload a file to the chat, \
    or name one in your message with `FILE: uploaded/<object key>` or `FILENAME: <name.ext>`, \
    or set pipeline.default_file_path on the server.";

/// Turn handling result
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub session_id: String,
    pub fingerprint: String,
    pub file_path: Option<String>,
    /// This request launched the pipeline
    pub started: bool,
    /// The session was already known for this fingerprint
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// First rendered events, for non-streaming callers
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<String>,
}

async fn handle_turn(State(state): State<AppState>, Json(body): Json<Value>) -> Json<TurnResponse> {
    let request = TurnRequest::from_chat_body(&body);
    let turns = &state.config.turns;

    let bucket = time_bucket(chrono::Utc::now(), turns.join_window());
    let fp = fingerprint(
        &request.conversation_id,
        &request.last_user_id,
        &request.query,
        bucket,
    );
    let resolved = state.correlator.resolve(&fp);
    debug!(
        fingerprint = %fp,
        session_id = %resolved.session_id,
        reused = resolved.reused,
        "Turn resolved"
    );

    let file_path = resolve_file(&state, &request, &resolved.session_id)
        .await
        .or_else(|| state.config.pipeline.default_file_path.clone());

    let mut response = TurnResponse {
        session_id: resolved.session_id.clone(),
        fingerprint: fp.clone(),
        file_path: file_path.clone(),
        started: false,
        reused: resolved.reused,
        message: None,
        preview: Vec::new(),
    };

    let Some(file_path) = file_path else {
        response.message = Some(MISSING_FILE_MESSAGE.to_string());
        return Json(response);
    };

    let key = start_key(&fp, &file_path, &request.query);
    if state.start_guard.should_suppress_start(&key) {
        debug!(session_id = %resolved.session_id, "Duplicate turn start suppressed");
        response.message = Some(format!("already running (session={})", resolved.session_id));
    } else {
        info!(session_id = %resolved.session_id, file_path = %file_path, "Turn started");
        state.launch(StageContext::new(
            resolved.session_id.clone(),
            file_path.clone(),
            request.query.clone(),
        ));
        response.started = true;
        response.message = Some(format!(
            "started (session={}, file={})",
            resolved.session_id, file_path
        ));
    }

    if !request.stream {
        let relay = &state.config.relay;
        response.preview = drain_short(
            &state.trace_source(),
            &resolved.session_id,
            relay.short_poll_tries,
            relay.trace_poll(),
        )
        .await;
    }

    Json(response)
}

/// Object key the turn runs on.
///
/// An explicit `uploaded/...` key is used as is. Anything else goes through
/// upload resolution first, and an explicit non-key path is the fallback.
async fn resolve_file(state: &AppState, request: &TurnRequest, session_id: &str) -> Option<String> {
    if let Some(key) = request.object_key() {
        return Some(key.to_string());
    }
    let names = request.candidate_names();
    match state.uploads.resolve(session_id, &names).await {
        Some(key) => {
            debug!(session_id, key = %key, "Turn file resolved from uploads");
            Some(key)
        }
        None => request.file_path.clone(),
    }
}

/// Turn routes
pub fn turns_routes() -> Router<AppState> {
    Router::new().route("/api/v1/turns", post(handle_turn))
}
