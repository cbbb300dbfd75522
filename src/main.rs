use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod config;
mod db;
mod response;
mod state;
mod users;

use crate::{config::AppConfig, db::Storage, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("load configuration")?;

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| config.server.mode.default_log_filter().to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(env_filter))
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(env_filter))
            .init();
    }

    let storage = Storage::connect(&config.database).await?;
    tracing::info!(driver = ?storage.driver(), mode = ?config.server.mode, "storage ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parse listen address")?;

    let state = AppState::new(&config, &storage).context("build password hasher")?;
    let result = app::serve(app::build_app(state), addr).await;

    storage.close().await;
    result
}
