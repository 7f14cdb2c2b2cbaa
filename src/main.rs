// =============================================================================
// dealer-flow — collector + snapshot API entrypoint
// =============================================================================
//
// Runs the Deribit collector and the HTTP snapshot endpoint in one process.
// The processor and warehouse writer ship as their own binaries
// (`dealer-processor`, `dealer-ch-writer`).
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dealer_flow::api::rest::{self, ApiState};
use dealer_flow::collector;
use dealer_flow::config::Config;
use dealer_flow::redis_stream;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(Config::from_env()?);
    info!(
        currency = %cfg.currency,
        authenticated = cfg.has_credentials(),
        "dealer-flow collector starting"
    );

    // Fatal when the stream log never becomes reachable.
    let redis = redis_stream::connect(&cfg.redis_url).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("shutdown signal received, stopping gracefully");
        let _ = shutdown_tx.send(true);
    });

    // ── Snapshot API ─────────────────────────────────────────────────────
    let api_state = ApiState {
        redis: redis.clone(),
    };
    let bind_addr = cfg.snapshot_bind_addr.clone();
    tokio::spawn(async move {
        let app = rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "snapshot API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "snapshot API failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind snapshot API"),
        }
    });

    // ── Collector ────────────────────────────────────────────────────────
    collector::run(cfg, redis, shutdown_rx).await?;
    info!("dealer-flow stopped");
    Ok(())
}
