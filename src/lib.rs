//! Vendsync - back office for vending-machine operators.
//!
//! Serves the JSON API the dashboard front end calls: the item catalog,
//! voting lists, promotions, the Nayax POS integration and the mapping
//! engine that joins manual machine items with Nayax selections.

use anyhow::Context;
use tracing::info;

pub mod analytics;
pub mod auth;
pub mod catalog;
pub mod commands;
pub mod config;
mod data_helpers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod mapping;
pub mod nayax;
pub mod promotions;
pub mod state;
pub mod storage;
pub mod voting;

use config::Config;
use state::AppState;

/// Load configuration, open the database and serve until the process exits.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    // Keep the guard alive for the lifetime of the server; dropping it flushes logs.
    let _log_guard = diagnostics::init_logging(&config.log_dir);

    info!("Starting Vendsync v{}", env!("CARGO_PKG_VERSION"));
    config.log_defaults();

    let db = db::init(&config.data_dir).map_err(anyhow::Error::msg)?;
    let bind_addr = config.bind_addr;
    let state = AppState::new(db, config).context("building application state")?;
    let app = commands::router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Vendsync stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
    }
}
