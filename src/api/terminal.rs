//! Terminal session API
//!
//! Lets an authenticated user inspect or end their own terminal session
//! without opening a WebSocket.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tracing::info;

use crate::middleware::auth::RequireAuth;
use crate::websocket::TerminalState;

#[derive(Debug, Serialize)]
struct NotFound {
    success: bool,
    error: &'static str,
    code: &'static str,
}

fn no_session() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(NotFound {
            success: false,
            error: "No terminal session for this user",
            code: "NOT_FOUND",
        }),
    )
        .into_response()
}

/// GET /api/v1/terminal/session
async fn get_session(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<TerminalState>,
) -> Response {
    match state.registry.get(&auth.identity).await {
        Some(session) => Json(session.status()).into_response(),
        None => no_session(),
    }
}

/// DELETE /api/v1/terminal/session
async fn delete_session(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<TerminalState>,
) -> Response {
    if state.registry.evict(&auth.identity).await {
        info!(user = %auth.identity, "Terminal session ended via API");
        StatusCode::NO_CONTENT.into_response()
    } else {
        no_session()
    }
}

pub fn terminal_routes() -> Router {
    Router::new().route(
        "/api/v1/terminal/session",
        get(get_session).delete(delete_session),
    )
}
