//! pmm-bot entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Passive market-making bot for perpetual futures.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (falls back to PMM_CONFIG, then
    /// config/default.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    pmm_telemetry::init_logging()?;
    info!("starting pmm-bot v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => pmm_bot::AppConfig::from_file(&path)?,
        None => pmm_bot::AppConfig::load()?,
    };
    info!(
        markets = config.markets.len(),
        dry_run = config.dry_run,
        "configuration loaded"
    );

    let app = pmm_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
