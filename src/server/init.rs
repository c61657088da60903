//! Server initialization
//!
//! Contains the main `run()` function that starts all server components.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{http::HeaderValue, routing::get, Extension, Router};
use knot_core::{
    format_error_for_cli, wait_for_shutdown_signal, AuthStore, ShutdownController, UserIdentity,
};
use knot_terminal::{SessionRegistry, ShutdownCoordinator};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::config::AppConfig;
use super::loader::load_config;
use super::validation::validate_config;
use crate::middleware::auth::SharedVerifier;
use crate::websocket::TerminalState;

/// Run the server
pub async fn run() -> Result<()> {
    let config = load_config()?;
    if let Err(e) = validate_config(&config) {
        eprintln!("{}", format_error_for_cli(&e));
        return Err(e).context("Invalid configuration");
    }

    // ================================================================
    // Authentication
    // ================================================================
    let auth_store = init_auth(&config)?;
    info!(
        tokens = auth_store.active_token_count(),
        "Authentication initialized"
    );
    let verifier: SharedVerifier = auth_store;

    // ================================================================
    // Terminal sessions
    // ================================================================
    let spec = config.terminal.process_spec();
    info!(
        command = %spec.command_line(),
        working_dir = ?spec.working_dir,
        buffer_capacity = config.terminal.buffer_capacity,
        "Terminal sessions configured"
    );

    let shutdown_controller = ShutdownController::new();
    let registry = SessionRegistry::new(config.terminal.buffer_capacity);
    let coordinator = ShutdownCoordinator::new(registry.clone())
        .with_grace_period(config.terminal.shutdown_grace());
    let state = TerminalState::new(registry, spec, Arc::clone(&shutdown_controller));

    let app = build_router(&config, state, verifier);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("HTTP server listening on http://{}", addr);
    info!(
        "WebSocket terminal endpoint available at ws://{}{}",
        addr, config.terminal.path
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Sessions are drained before the listener stops, so attached clients
    // get their exit notice while the connection is still up.
    let server_shutdown = Arc::clone(&shutdown_controller);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            server_shutdown
                .shutdown_with(async {
                    let report = coordinator.run().await;
                    if report.timed_out > 0 {
                        warn!(
                            timed_out = report.timed_out,
                            "Some terminal processes did not confirm exit"
                        );
                    }
                })
                .await;
        })
        .await
        .context("HTTP server error")?;

    info!("Knot shutdown complete");
    Ok(())
}

/// Build the token store from `[[auth.tokens]]`
fn init_auth(config: &AppConfig) -> Result<Arc<AuthStore>> {
    let store = AuthStore::new();
    for entry in &config.auth.tokens {
        let label = entry.label.as_deref().unwrap_or("config");
        store
            .register_digest(UserIdentity::new(entry.user.trim()), &entry.token_sha256, label)
            .with_context(|| format!("Failed to register token for user '{}'", entry.user))?;
    }
    Ok(Arc::new(store))
}

/// Build the main router with all endpoints
pub fn build_router(config: &AppConfig, state: TerminalState, verifier: SharedVerifier) -> Router {
    Router::new()
        // Health and session API (auth applied per-handler via RequireAuth extractor)
        .merge(crate::api::api_router())
        // WebSocket terminal
        .merge(crate::websocket::websocket_router(&config.terminal.path))
        .route("/", get(|| async { "Knot terminal server" }))
        // Layers (applied to all routes)
        .layer(Extension(state))
        .layer(Extension(verifier))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
