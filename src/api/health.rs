//! Health check endpoints with component-level diagnostics.
//!
//! Provides:
//! - `/health` - simple "healthy" + version (for load balancers)
//! - `/health/detailed` - per-component status (event_bus, turns, storage)

use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;

use crate::server::AppState;

const CHECK_KEY: &str = "health/check";

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health response with per-component checks
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

/// All component health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub event_bus: ComponentHealth,
    pub turns: ComponentHealth,
    pub storage: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn healthy_with_details(latency_ms: Option<u64>, details: serde_json::Value) -> Self {
        Self {
            status: "healthy",
            latency_ms,
            error: None,
            details: Some(details),
        }
    }

    fn unhealthy(error: String, details: serde_json::Value) -> Self {
        Self {
            status: "unhealthy",
            latency_ms: None,
            error: Some(error),
            details: Some(details),
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn detailed_health_check(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let event_bus = ComponentHealth::healthy_with_details(
        None,
        json!({"sessions": state.bus.session_count()}),
    );
    let turns = ComponentHealth::healthy_with_details(
        None,
        json!({
            "tracked_turns": state.correlator.len(),
            "start_guards": state.start_guard.len(),
            "run_guards": state.run_guard.len(),
        }),
    );

    let backend = state.store.name().to_string();
    let start = Instant::now();
    let storage = match state.store.exists(CHECK_KEY).await {
        Ok(_) => ComponentHealth::healthy_with_details(
            Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
            json!({"backend": backend}),
        ),
        Err(e) => ComponentHealth::unhealthy(e.to_string(), json!({"backend": backend})),
    };

    let status = if storage.is_healthy() {
        "healthy"
    } else {
        "degraded"
    };

    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks {
            event_bus,
            turns,
            storage,
        },
    })
}

/// Health routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
}
