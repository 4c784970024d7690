//! # Linkdrop Server
//!
//! Share links between your devices in real time.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! linkdrop
//!
//! # Run with custom config
//! linkdrop --config /path/to/linkdrop.toml
//!
//! # Run with environment variables
//! LINKDROP_PORT=8080 LINKDROP_HOST=0.0.0.0 LINKDROP_DATABASE=/var/lib/linkdrop.db linkdrop
//! ```

use anyhow::Result;
use linkdrop_server::{config::Config, handlers};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkdrop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_from_args(std::env::args().skip(1))?;

    tracing::info!(
        "Starting Linkdrop server on {}:{} (supersede: {:?})",
        config.host,
        config.port,
        config.sessions.supersede
    );

    handlers::run_server(config).await?;

    Ok(())
}
