// =============================================================================
// Processor — raw-stream consumer and 1 Hz metrics publisher
// =============================================================================
//
// Reads the raw log as consumer group `processor`/`p1` (COUNT 500, BLOCK
// 200 ms), feeds every entry to the risk book, acks the batch, and once a
// second publishes the aggregate record to the metrics stream. Malformed
// entries are logged and skipped but still consumed; transient log errors
// back off 5 s, re-ensure the group and resume.
// =============================================================================

pub mod book;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::redis_stream::{self, STREAM_METRICS, STREAM_RAW};

use book::RiskBook;

/// Consumer group and consumer names on the raw stream.
pub const GROUP: &str = "processor";
pub const CONSUMER: &str = "p1";

/// Entries per XREADGROUP call.
const READ_COUNT: usize = 500;
/// Blocking-read timeout, milliseconds.
const BLOCK_MS: usize = 200;
/// Publish clock period, seconds.
const PUBLISH_INTERVAL: f64 = 1.0;
/// Backoff after a transient stream error.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Processor service loop. Returns when shutdown is signalled; errors out
/// only when the consumer group cannot be established at startup.
pub async fn run(
    _cfg: Arc<Config>,
    mut redis: ConnectionManager,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    redis_stream::ensure_group(&mut redis, STREAM_RAW, GROUP, "$")
        .await
        .context("failed to establish raw-stream consumer group")?;

    let mut book = RiskBook::new();
    let mut last_pub = unix_now();
    info!("processor started, waiting for data");

    loop {
        if *shutdown.borrow() {
            info!("processor shutting down");
            return Ok(());
        }

        let opts = StreamReadOptions::default()
            .group(GROUP, CONSUMER)
            .count(READ_COUNT)
            .block(BLOCK_MS);
        let reply: redis::RedisResult<StreamReadReply> =
            redis.xread_options(&[STREAM_RAW], &[">"], &opts).await;

        match reply {
            Ok(reply) => {
                let mut delivered: Vec<String> = Vec::new();
                for key in reply.keys {
                    for entry in key.ids {
                        let now = unix_now();
                        match redis_stream::entry_payload(&entry) {
                            Some(payload) => {
                                if let Err(e) = book.apply_raw(&payload, now) {
                                    warn!(id = %entry.id, error = %e, "dropping malformed raw entry");
                                }
                            }
                            None => warn!(id = %entry.id, "raw entry without payload"),
                        }
                        delivered.push(entry.id.clone());
                    }
                }
                // Consume the batch whether or not every entry parsed:
                // a poison message must not stall the head.
                if !delivered.is_empty() {
                    if let Err(e) =
                        redis_stream::ack(&mut redis, STREAM_RAW, GROUP, &delivered).await
                    {
                        warn!(error = %e, "failed to ack raw batch");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "raw-stream read failed, retrying in 5s");
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
                // The connection manager reconnects underneath us; the
                // group may need re-creating after a flush or failover.
                if let Err(e) = redis_stream::ensure_group(&mut redis, STREAM_RAW, GROUP, "$").await
                {
                    warn!(error = %e, "failed to re-ensure consumer group");
                }
                continue;
            }
        }

        let now = unix_now();
        if now - last_pub >= PUBLISH_INTERVAL {
            if let Some(record) = book.build_metrics(now) {
                match serde_json::to_vec(&record) {
                    Ok(payload) => {
                        if let Err(e) =
                            redis_stream::publish(&mut redis, STREAM_METRICS, &payload).await
                        {
                            warn!(error = %e, "failed to publish metrics record");
                        } else {
                            debug!(
                                price = record.price,
                                msg_rate = record.msg_rate,
                                ngi = record.ngi,
                                scenario = %record.scenario,
                                "metrics published"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialise metrics record"),
                }
            }
            last_pub = now;
        }
    }
}
