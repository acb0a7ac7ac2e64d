// src/main.rs - bootstrap: load config, build the pool, ensure the schema
use anyhow::Context;
use log::info;

use mediashare_be::AppState;
use mediashare_be::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let settings = Settings::from_env().context("failed to load settings")?;
    info!("settings: {:?}", settings);

    let state = AppState::bootstrap(&settings)
        .await
        .context("failed to bootstrap storage")?;

    let status = state.db.status();
    info!(
        "ready: pool size={} available={} max={}",
        status.size, status.available, status.max_size
    );
    Ok(())
}
