//! tradelink connectivity layer - entry point.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Resilient connectivity layer between the dashboard and the trading backend
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TRADELINK_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persist the offline queue and cache in this directory
    #[arg(long)]
    offline_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any wss:// connections)
    tradelink_ws::init_crypto();

    let args = Args::parse();

    tradelink_telemetry::init_logging()?;

    info!("Starting tradelink v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TRADELINK_CONFIG env var > defaults and environment only
    let config_path = args
        .config
        .or_else(|| std::env::var_os("TRADELINK_CONFIG").map(PathBuf::from));
    if let Some(path) = &config_path {
        info!(config_path = %path.display(), "Loading configuration");
    }

    let mut config = tradelink_app::AppConfig::load(config_path.as_deref())?;
    if let Some(dir) = args.offline_dir {
        config = config.with_offline_dir(dir);
    }

    let app = tradelink_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
