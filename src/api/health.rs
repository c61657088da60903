//! Health check endpoint (for load balancers)

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::websocket::TerminalState;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
}

async fn health_check(Extension(state): Extension<TerminalState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.registry.len().await,
    })
}

/// Health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}
