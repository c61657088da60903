//! WebSocket module for Knot
//!
//! Provides the interactive terminal endpoint (default path `/terminal`).

pub mod terminal;

pub use terminal::{terminal_handler, TerminalState};

use axum::{routing::get, Router};

/// Create the WebSocket router with the terminal mounted at `path`
pub fn websocket_router(path: &str) -> Router {
    Router::new().route(path, get(terminal_handler))
}
