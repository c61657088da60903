//! Terminal WebSocket module

pub mod connection;
pub mod protocol;

use axum::{
    extract::{ws::WebSocketUpgrade, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use knot_core::ShutdownController;
use knot_terminal::{ProcessSpec, SessionRegistry};
use std::sync::Arc;
use tracing::debug;

use crate::middleware::auth::RequireAuth;
use protocol::TerminalParams;

/// Shared state for terminal connections
#[derive(Clone)]
pub struct TerminalState {
    pub registry: SessionRegistry,
    /// What every new session runs
    pub spec: Arc<ProcessSpec>,
    pub shutdown: Arc<ShutdownController>,
}

impl TerminalState {
    pub fn new(
        registry: SessionRegistry,
        spec: ProcessSpec,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            registry,
            spec: Arc::new(spec),
            shutdown,
        }
    }
}

/// WebSocket upgrade handler. Authentication runs before the upgrade, so a
/// rejected request gets a plain 401 and no WebSocket is ever opened.
pub async fn terminal_handler(
    RequireAuth(auth): RequireAuth,
    Query(params): Query<TerminalParams>,
    Extension(state): Extension<TerminalState>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_shutting_down() || state.registry.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    debug!(user = %auth.identity, method = ?auth.method, "Terminal upgrade accepted");
    let identity = auth.identity;
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, state, identity, params.format)
    })
}
