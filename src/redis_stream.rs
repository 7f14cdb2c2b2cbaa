// =============================================================================
// Stream-log client — Redis streams shared by all three services
// =============================================================================
//
// The pipeline's backbone is three append-only streams, every entry a single
// `d` field holding the payload bytes:
//
//   dealer_raw                   collector -> processor (consumer group)
//   dealer_metrics               processor -> snapshot API + writer
//   deribit_book_summaries_feed  collector -> writer
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::streams::StreamId;
use redis::AsyncCommands;
use tracing::{info, warn};

/// Raw WebSocket messages (price index + tickers), verbatim.
pub const STREAM_RAW: &str = "dealer_raw";
/// Aggregate metrics records, one JSON document per publish tick.
pub const STREAM_METRICS: &str = "dealer_metrics";
/// Book-summary snapshots: `{ts, summary_data: [...]}` JSON documents.
pub const STREAM_SUMMARIES: &str = "deribit_book_summaries_feed";

/// Readiness-gate attempts before a service gives up on Redis.
const READY_RETRIES: u32 = 10;
/// Delay between readiness attempts.
const READY_DELAY: Duration = Duration::from_secs(3);

/// Open a managed connection to the stream log, waiting for Redis to answer
/// PING. Retries a bounded number of times; services treat failure here as
/// fatal at startup. The returned manager transparently re-establishes the
/// underlying connection afterwards; callers still see transient errors and
/// run their own retry policy.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .with_context(|| format!("invalid Redis URL: {redis_url}"))?;

    info!(retries = READY_RETRIES, "waiting for Redis to become available");
    for attempt in 1..=READY_RETRIES {
        match client.get_connection_manager().await {
            Ok(mut manager) => {
                let res: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut manager).await;
                match res {
                    Ok(_) => {
                        info!("Redis is ready");
                        return Ok(manager);
                    }
                    Err(e) => {
                        warn!(attempt, retries = READY_RETRIES, error = %e, "Redis not answering PING");
                    }
                }
            }
            Err(e) => {
                warn!(attempt, retries = READY_RETRIES, error = %e, "Redis connection failed");
            }
        }
        tokio::time::sleep(READY_DELAY).await;
    }
    anyhow::bail!("Redis not ready after {READY_RETRIES} attempts")
}

/// Create a consumer group on `stream`, creating the stream if needed.
/// An already-existing group (BUSYGROUP) counts as success.
pub async fn ensure_group(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    start_id: &str,
) -> Result<()> {
    let res: redis::RedisResult<String> = conn.xgroup_create_mkstream(stream, group, start_id).await;
    match res {
        Ok(_) => {
            info!(stream, group, "created consumer group");
            Ok(())
        }
        Err(e) if e.code() == Some("BUSYGROUP") => {
            info!(stream, group, "consumer group already exists");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to create group {group} on {stream}")),
    }
}

/// Append one entry (`{d: payload}`) to a stream.
pub async fn publish(conn: &mut ConnectionManager, stream: &str, payload: &[u8]) -> Result<()> {
    let _: String = conn
        .xadd(stream, "*", &[("d", payload)])
        .await
        .with_context(|| format!("XADD to {stream} failed"))?;
    Ok(())
}

/// Acknowledge a batch of delivered ids in a single XACK call.
pub async fn ack(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    ids: &[String],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let _: i64 = conn
        .xack(stream, group, ids)
        .await
        .with_context(|| format!("XACK on {stream} failed"))?;
    Ok(())
}

/// Extract the `d` payload bytes from a delivered stream entry.
pub fn entry_payload(entry: &StreamId) -> Option<Vec<u8>> {
    entry.get::<Vec<u8>>("d")
}
