//! Web API module for turnstream
//!
//! Provides endpoints for:
//! - Health checks
//! - Chat turns (correlated, de-duplicated pipeline launches)
//! - Explicit analysis runs
//! - Session events and purge
//! - Live SSE streams and durable traces
//! - File uploads and chat front-end attachment ingest

pub mod analyze;
pub mod health;
pub mod sessions;
pub mod stream;
pub mod trace;
pub mod turns;
pub mod uploads;

use axum::Router;
use serde::Serialize;

use crate::server::AppState;

pub use analyze::analyze_routes;
pub use health::health_routes;
pub use sessions::sessions_routes;
pub use stream::stream_routes;
pub use trace::trace_routes;
pub use turns::turns_routes;
pub use uploads::uploads_routes;

/// Standard envelope for JSON management endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create the API router with all endpoints
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(turns_routes())
        .merge(analyze_routes())
        .merge(sessions_routes())
        .merge(stream_routes())
        .merge(trace_routes())
        .merge(uploads_routes())
        .with_state(state)
}
