// =============================================================================
// Warehouse writer — batched stream consumers with at-least-once delivery
// =============================================================================
//
// One consumer task per stream (metrics, book summaries), both in consumer
// group `ch_writer_group`. Rows accumulate until the batch reaches 100 rows
// or 10 s of age, then one ClickHouse insert and one XACK covering every
// pending id. Warehouse failures never ack: the batch is retried after 5 s.
// A crash between insert and ack therefore duplicates rows, never loses
// them.
// =============================================================================

pub mod rows;

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::redis_stream::{self, STREAM_METRICS, STREAM_SUMMARIES};

use rows::{
    parse_metrics_rows, parse_summary_rows, DealerMetricsRow, InstrumentSummaryRow,
    TABLE_DEALER_METRICS, TABLE_INSTRUMENT_SUMMARIES,
};

/// Consumer group and consumer names shared by both stream consumers.
pub const GROUP: &str = "ch_writer_group";
pub const CONSUMER: &str = "ch_writer_consumer_1";

/// Rows accumulated before an insert is forced.
const BATCH_SIZE: usize = 100;
/// Maximum batch age before an insert is forced anyway.
const BATCH_MAX_AGE: Duration = Duration::from_secs(10);
/// Blocking-read timeout, milliseconds.
const BLOCK_MS: usize = 1000;
/// Pause before retrying a failed warehouse insert.
const CH_RETRY_BACKOFF: Duration = Duration::from_secs(5);
/// Bound on the final flush at shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Build the ClickHouse client from configuration.
pub fn clickhouse_client(cfg: &Config) -> clickhouse::Client {
    clickhouse::Client::default()
        .with_url(cfg.clickhouse_url())
        .with_database(cfg.clickhouse_db_name.as_str())
        .with_user(cfg.clickhouse_user.as_str())
        .with_password(cfg.clickhouse_password.as_str())
}

/// Writer service: ping the warehouse (fatal when unreachable), then run
/// one consumer task per stream until shutdown.
pub async fn run(
    cfg: std::sync::Arc<Config>,
    redis: ConnectionManager,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let client = clickhouse_client(&cfg);
    client
        .query("SELECT 1")
        .execute()
        .await
        .context("ClickHouse unreachable at startup")?;
    info!(url = %cfg.clickhouse_url(), db = %cfg.clickhouse_db_name, "connected to ClickHouse");

    let metrics_task = tokio::spawn(consume_stream::<DealerMetricsRow>(
        redis.clone(),
        client.clone(),
        STREAM_METRICS,
        TABLE_DEALER_METRICS,
        parse_metrics_rows,
        shutdown.clone(),
    ));
    let summaries_task = tokio::spawn(consume_stream::<InstrumentSummaryRow>(
        redis,
        client,
        STREAM_SUMMARIES,
        TABLE_INSTRUMENT_SUMMARIES,
        parse_summary_rows,
        shutdown,
    ));

    let (metrics_res, summaries_res) = tokio::join!(metrics_task, summaries_task);
    metrics_res.context("metrics consumer panicked")??;
    summaries_res.context("summaries consumer panicked")??;
    info!("writer stopped");
    Ok(())
}

/// Insert a finished batch, one row at a time over a single RowBinary
/// insert.
async fn insert_rows<T>(client: &clickhouse::Client, table: &str, batch: &[T]) -> Result<()>
where
    T: clickhouse::Row + Serialize,
{
    let mut insert = client
        .insert(table)
        .with_context(|| format!("failed to open insert into {table}"))?;
    for row in batch {
        insert
            .write(row)
            .await
            .with_context(|| format!("failed to write row to {table}"))?;
    }
    insert
        .end()
        .await
        .with_context(|| format!("insert into {table} failed"))?;
    Ok(())
}

/// Consume one stream into one table until shutdown.
async fn consume_stream<T>(
    mut redis: ConnectionManager,
    client: clickhouse::Client,
    stream: &'static str,
    table: &'static str,
    parse: fn(&[u8], f64) -> Result<Vec<T>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    T: clickhouse::Row + Serialize + Send + Sync + 'static,
{
    info!(stream, table, "consumer starting");
    redis_stream::ensure_group(&mut redis, stream, GROUP, "0")
        .await
        .with_context(|| format!("failed to establish consumer group on {stream}"))?;

    let mut batch: Vec<T> = Vec::new();
    let mut pending_ids: Vec<String> = Vec::new();
    let mut last_flush = Instant::now();

    while !*shutdown.borrow() {
        let opts = StreamReadOptions::default()
            .group(GROUP, CONSUMER)
            .count(BATCH_SIZE)
            .block(BLOCK_MS);
        let reply: redis::RedisResult<StreamReadReply> =
            redis.xread_options(&[stream], &[">"], &opts).await;

        match reply {
            Ok(reply) => {
                for key in reply.keys {
                    for entry in key.ids {
                        match redis_stream::entry_payload(&entry) {
                            Some(payload) => match parse(&payload, unix_now()) {
                                Ok(parsed) => batch.extend(parsed),
                                Err(e) => {
                                    // Dropped, but still acked with the next
                                    // flush so it cannot pin the head.
                                    warn!(stream, id = %entry.id, error = %e, "dropping malformed payload");
                                }
                            },
                            None => {
                                warn!(stream, id = %entry.id, "entry without payload");
                            }
                        }
                        pending_ids.push(entry.id.clone());
                    }
                }
            }
            Err(e) => {
                warn!(stream, error = %e, "stream read failed, retrying in 5s");
                tokio::select! {
                    _ = tokio::time::sleep(CH_RETRY_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
                if let Err(e) = redis_stream::ensure_group(&mut redis, stream, GROUP, "0").await {
                    warn!(stream, error = %e, "failed to re-ensure consumer group");
                }
                continue;
            }
        }

        let due = batch.len() >= BATCH_SIZE || last_flush.elapsed() > BATCH_MAX_AGE;
        if due && !(batch.is_empty() && pending_ids.is_empty()) {
            match flush(&mut redis, &client, stream, table, &batch, &pending_ids).await {
                Ok(()) => {
                    batch.clear();
                    pending_ids.clear();
                    last_flush = Instant::now();
                }
                Err(e) => {
                    // Keep the batch and its ids; retry after a pause.
                    warn!(stream, error = %e, "warehouse insert failed, retrying batch in 5s");
                    tokio::select! {
                        _ = tokio::time::sleep(CH_RETRY_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    // Best-effort flush of whatever is in flight.
    if !(batch.is_empty() && pending_ids.is_empty()) {
        info!(stream, rows = batch.len(), "shutdown: flushing in-flight batch");
        match tokio::time::timeout(
            SHUTDOWN_FLUSH_TIMEOUT,
            flush(&mut redis, &client, stream, table, &batch, &pending_ids),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(stream, error = %e, "final flush failed"),
            Err(_) => warn!(stream, "final flush timed out"),
        }
    }
    info!(stream, "consumer stopped");
    Ok(())
}

/// Insert the batch, then acknowledge every pending id in one XACK call.
/// An id is acked only after a successful insert that covered its rows.
async fn flush<T>(
    redis: &mut ConnectionManager,
    client: &clickhouse::Client,
    stream: &str,
    table: &str,
    batch: &[T],
    pending_ids: &[String],
) -> Result<()>
where
    T: clickhouse::Row + Serialize,
{
    if !batch.is_empty() {
        insert_rows(client, table, batch).await?;
        info!(stream, table, rows = batch.len(), "batch inserted");
    }
    redis_stream::ack(redis, stream, GROUP, pending_ids).await?;
    Ok(())
}
