//! # printlink
//!
//! Dashboard backend that keeps live connections to 3D printers and streams
//! their telemetry to UI clients.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! printlink
//!
//! # Run with environment variables
//! PRINTLINK_PORT=8080 PRINTLINK_HOST=0.0.0.0 printlink
//!
//! # Point a connection at the bundled mock printer
//! mock-printer &
//! curl -X POST localhost:8480/connections \
//!     -H 'content-type: application/json' \
//!     -d '{"host":"127.0.0.1","controlPort":9999}'
//! curl -X POST localhost:8480/connections/c1/connect
//! ```

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
                .unwrap_or_else(|_| "printlink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting printlink on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
