use anyhow::{Context, Result};
use sni_proxy::app::App;
use sni_proxy::config::{self, AppConfig};
use sni_proxy::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());

    // Load config first (before logging init) to get logging config
    let config = AppConfig::from_file(&path)?;

    // Validate configuration before starting
    config
        .validate()
        .context("Configuration validation failed")?;

    let _guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging system")?;

    info!("SNI proxy starting with config {}", path);

    let mut app = App::new(config);
    app.start().await.context("Failed to start SNI proxy")?;

    info!("SNI proxy started. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received, shutting down...");
    app.shutdown().await;

    Ok(())
}
