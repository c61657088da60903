//! REST API for Knot
//!
//! - `/health`: liveness and session count
//! - `/api/v1/terminal/session`: the caller's own terminal session

mod health;
mod terminal;

pub use health::health_routes;
pub use terminal::terminal_routes;

use axum::Router;

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new().merge(health_routes()).merge(terminal_routes())
}
