mod config;
mod main_lib;

use config::Config;
use main_lib::{build_manager, follow, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = Config::from_env()?;

    tracing::info!("Following {}", config.project_url);
    let manager = build_manager(&config)?;
    let result = follow(&manager).await;
    manager.shutdown().await;
    result
}
