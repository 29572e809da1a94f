//! kwami-memory - HTTP Server Entry Point
//!
//! Starts the memory inspection API.

use kwami_memory::{api, config::Config, init_memory};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kwami_memory=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: memory={}, base_url={}, kwami_name={}",
        config.memory.is_enabled(),
        config.memory.base_url,
        config.memory.kwami_name
    );

    // Rejected credentials stop startup here
    let store = init_memory(&config.memory).await?;

    api::serve(config, store).await?;

    Ok(())
}
