mod commands;
mod config;
mod dedup;
mod events;
mod extract;
mod line;
mod pipeline;
mod server;
mod signature;
mod store;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::line::LineClient;
use crate::pipeline::AppState;
use crate::store::SupabaseStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,posbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Store: {}", config.store.url);
    info!("  Wake word: {}", config.line.wake_word);
    info!(
        "  Listening on: {}:{}",
        config.server.host, config.server.port
    );

    let store = Arc::new(SupabaseStore::new(&config.store)?);
    let replies = Arc::new(LineClient::new(&config.line)?);

    // Create shared state
    let state = Arc::new(AppState {
        config,
        store,
        replies,
    });

    // Run the webhook server
    info!("Webhook service is starting...");
    server::run(state).await?;

    Ok(())
}
