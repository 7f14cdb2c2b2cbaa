// =============================================================================
// dealer-ch-writer — warehouse writer entrypoint
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dealer_flow::config::Config;
use dealer_flow::{redis_stream, writer};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(Config::from_env()?);
    info!("dealer-ch-writer starting");

    let redis = redis_stream::connect(&cfg.redis_url).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("shutdown signal received, flushing in-flight batches");
        let _ = shutdown_tx.send(true);
    });

    // ClickHouse unreachable at startup is fatal (non-zero exit).
    writer::run(cfg, redis, shutdown_rx).await?;
    info!("dealer-ch-writer stopped");
    Ok(())
}
