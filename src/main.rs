//! Knot - persistent remote terminal sessions
//!
//! CLI entry point for the Knot server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod middleware;
mod server;
mod websocket;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "knot=info,knot_terminal=info,knot_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = cli::Cli::parse();

    if matches!(cli.command, Some(cli::Commands::Serve)) {
        info!("Starting Knot terminal server v{}", env!("CARGO_PKG_VERSION"));
    }

    cli::run(cli).await
}
