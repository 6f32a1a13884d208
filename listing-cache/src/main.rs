use anyhow::Result;
use listing_cache::{AppState, CacheConfig, Dispatcher};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = CacheConfig::from_env()?;
    let (state, rx) = AppState::connect(config).await?;
    info!("listing-cache connected, starting dispatcher");

    let dispatcher = Dispatcher::new(state);
    let worker = tokio::spawn(dispatcher.run(rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    worker.abort();
    Ok(())
}
