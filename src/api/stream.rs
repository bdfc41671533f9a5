//! SSE streaming endpoint.
//!
//! GET /stream/:id?turn=<fingerprint>
//!
//! Pushes a session's events as `data:` frames, with `: keep-alive <ts>`
//! comments after a quiet heartbeat interval. When `turn` is given, every
//! delivered event refreshes that fingerprint's join window so the second
//! phase of a long turn still finds the session.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event as SseEvent, Sse},
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};
use turnstream_core::{Frame, StreamDelivery};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Turn fingerprint to keep alive while streaming
    turn: Option<String>,
}

/// SSE stream handler.
async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    debug!(session_id = %session_id, turn = ?query.turn, "Stream opened");

    let mut delivery = StreamDelivery::new(
        &state.bus,
        &session_id,
        state.config.delivery.clone(),
        state.shutdown.child_token(),
    );
    if let Some(fp) = query.turn.filter(|t| !t.is_empty()) {
        let correlator = state.correlator.clone();
        delivery = delivery.on_emit(move |_| {
            correlator.touch(&fp);
        });
    }

    Sse::new(delivery.into_stream().map(|frame| Ok(sse_frame(frame))))
}

fn sse_frame(frame: Frame) -> SseEvent {
    match frame {
        Frame::Event(event) => match SseEvent::default().json_data(&event) {
            Ok(sse) => sse,
            Err(e) => {
                warn!(session_id = %event.session_id, error = %e, "Event not serializable");
                SseEvent::default().comment("unserializable event skipped")
            }
        },
        Frame::Heartbeat(ts) => SseEvent::default().comment(format!("keep-alive {ts}")),
    }
}

/// Stream routes
pub fn stream_routes() -> Router<AppState> {
    Router::new().route("/stream/:id", get(stream_session))
}
