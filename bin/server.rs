// Cashbook - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use cashbook::server::{router, AppState};
use cashbook::{init_tracing, Config, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    tracing::info!(path = ?config.database_path, "database opened");

    let state = AppState::new(store, config.week_start, config.utc_offset);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    tracing::info!(
        addr = %config.bind_addr,
        week_start = ?config.week_start,
        utc_offset = %config.utc_offset,
        "cashbook server listening"
    );

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
