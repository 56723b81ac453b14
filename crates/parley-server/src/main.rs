//! # Parley Server
//!
//! Realtime chat presence and message routing server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley
//!
//! # Connect a client
//! websocat "ws://127.0.0.1:8080/ws?user_id=alice"
//! ```
//!
//! A `parley.toml` in the working directory, `/etc/parley/` or
//! `~/.config/parley/` takes precedence over the defaults.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);
    if config.idle.timeout_ms > 0 {
        tracing::info!(
            timeout_ms = config.idle.timeout_ms,
            "Idle connection sweep enabled"
        );
    }

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
