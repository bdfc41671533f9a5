//! Server initialization and main run loop

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::config::AppConfig;
use super::state::AppState;
use crate::api::api_router;

/// Run the server until Ctrl+C or SIGTERM
pub async fn run(config: AppConfig) -> Result<()> {
    info!(
        "Starting turnstream v{}",
        env!("CARGO_PKG_VERSION")
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState::from_config(config).context("Failed to initialize state")?;
    info!(
        storage = state.store.name(),
        stages = state.runner.len(),
        "State initialized"
    );

    let app = api_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await
        .context("HTTP server error")?;

    info!("turnstream shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, closing every live stream first
async fn shutdown_signal(streams: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
    streams.cancel();
}
