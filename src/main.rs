//! Lazarus server binary

use lazarus::config::Config;
use lazarus::server;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Starting lazarus relay");

    let config = Config::from_env()?;
    if config.api_key.is_none() {
        warn!("Neither API_KEY nor GEMINI_API_KEY is set, inference turns will fail");
    }
    info!(
        "Model {}, queue capacity {}, turn timeout {:?}",
        config.gemini.model, config.queue_capacity, config.turn_timeout
    );

    server::serve(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("lazarus relay stopped");
    Ok(())
}
