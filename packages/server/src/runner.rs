//! Server execution logic.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::handler::{health_check, notify_user, websocket_handler, ws_status};
use crate::signal::shutdown_signal;
use crate::state::AppState;

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/ws/status", get(ws_status))
        .route("/api/health", get(health_check))
        .route("/api/users/{user_id}/notify", post(notify_user))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the coordinator server until a shutdown signal arrives.
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
/// * `state` - Shared application state
pub async fn run_server(
    host: String,
    port: u16,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state.clone());

    let bind_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("cinesync server listening on {}", listener.local_addr()?);
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No deactivation side effect may fire once shutdown has begun.
    state.hub.shutdown().await;

    tracing::info!("Server shutdown complete");

    Ok(())
}
