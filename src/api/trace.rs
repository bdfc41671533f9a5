//! Durable trace access
//!
//! GET /trace/:id?raw=1 - the JSONL trace itself (404 until the first flush)
//! GET /trace/:id       - `{session_id, trace_url}`, the direct object URL if
//!                        the store has one

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use turnstream_core::trace_key;
use turnstream_replay::TraceSource;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    #[serde(default)]
    raw: Option<String>,
}

impl TraceQuery {
    fn wants_raw(&self) -> bool {
        matches!(self.raw.as_deref(), Some("1" | "true" | "yes"))
    }
}

/// Trace location
#[derive(Debug, Serialize)]
pub struct TraceLinkResponse {
    pub session_id: String,
    pub trace_url: Option<String>,
}

async fn get_trace(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> Response {
    if !query.wants_raw() {
        let key = trace_key(&state.bus.config().trace_prefix, &session_id);
        return Json(TraceLinkResponse {
            trace_url: state.store.direct_url(&key),
            session_id,
        })
        .into_response();
    }

    match state.trace_source().fetch_proxy(&session_id).await {
        Ok(body) => (
            [(header::CONTENT_TYPE, "application/x-ndjson; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) if e.is_not_found() => {
            (StatusCode::NOT_FOUND, format!("no trace for {session_id}")).into_response()
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Trace read failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Trace routes
pub fn trace_routes() -> Router<AppState> {
    Router::new().route("/trace/:id", get(get_trace))
}
