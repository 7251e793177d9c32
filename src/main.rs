mod analysis;
mod charts;
mod config;
mod error;
mod headless;
mod heatmap;
mod indicators;
mod market;
mod refresh;
mod tui;

use config::{AppConfig, AsyncStorageManager};
use market::BitstampClient;
use std::io::IsTerminal;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Logs go to `storage/dashboard.log` while the TUI owns the terminal and to
/// stderr otherwise.
fn init_tracing(storage: &AsyncStorageManager, interactive: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if interactive {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(storage.path("dashboard.log"))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let interactive = std::io::stdout().is_terminal();
    init_tracing(&storage, interactive)?;

    // Configuration problems are fatal before anything is fetched.
    let config = AppConfig::load(&storage).await?;
    let source = BitstampClient::new(&config.exchange)?;

    tracing::info!(
        tracked = config.tracked_pairs.len(),
        interval_secs = config.refresh.interval_secs,
        interactive,
        "starting dashboard"
    );

    if interactive {
        tui::run_tui(config, source).await
    } else {
        headless::run(config, source).await
    }
}
