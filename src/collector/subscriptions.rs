// =============================================================================
// Dynamic subscription manager — top-N tickers by open interest
// =============================================================================
//
// Runs beside the message pump on authenticated sessions. Each fresh book
// summary (and at least once per refresh interval) it recomputes the target
// set, diffs it against the active subscriptions and issues the
// unsubscribe/subscribe RPCs, chunked to stay below the exchange's
// per-request channel limit. The active set dies with the session; a
// reconnect starts from whatever the next summary says.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use super::rpc_request;
use crate::config::Config;

/// Exchange cap on channels per subscribe/unsubscribe request.
pub const MAX_CHANNELS_PER_REQUEST: usize = 40;
/// Pause between chunked requests.
const CHUNK_GAP: Duration = Duration::from_millis(100);

/// Ticker channel name for one instrument.
pub fn ticker_channel(instrument: &str) -> String {
    format!("ticker.{instrument}.100ms")
}

/// Rank summary entries by open interest and keep the top `n` names.
/// Entries without an instrument name or a numeric open interest are
/// ignored.
pub fn top_by_open_interest(entries: &[Value], n: usize) -> Vec<String> {
    let mut ranked: Vec<(&str, f64)> = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("instrument_name")?.as_str()?;
            let oi = entry.get("open_interest")?.as_f64()?;
            Some((name, oi))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().take(n).map(|(name, _)| name.to_owned()).collect()
}

/// Split the target set against the active one into instruments to
/// subscribe and to unsubscribe.
pub fn diff_subscriptions(
    active: &HashSet<String>,
    desired: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let to_subscribe = desired.difference(active).cloned().collect();
    let to_unsubscribe = active.difference(desired).cloned().collect();
    (to_subscribe, to_unsubscribe)
}

/// Queue one subscribe/unsubscribe RPC per chunk of ≤ 40 ticker channels,
/// with a 100 ms gap between chunks. Returns `Err` when the pump is gone.
async fn send_channel_rpcs(
    outbound: &mpsc::Sender<String>,
    method: &str,
    instruments: &[String],
) -> Result<(), mpsc::error::SendError<String>> {
    for chunk in instruments.chunks(MAX_CHANNELS_PER_REQUEST) {
        let channels: Vec<String> = chunk.iter().map(|i| ticker_channel(i)).collect();
        outbound
            .send(rpc_request(method, json!({ "channels": channels })))
            .await?;
        tokio::time::sleep(CHUNK_GAP).await;
    }
    Ok(())
}

/// Subscription-manager task. `active` is seeded with the session's initial
/// working set; this task is its only writer afterwards.
pub async fn run_manager(
    cfg: Arc<Config>,
    outbound: mpsc::Sender<String>,
    summaries: Arc<RwLock<Vec<Value>>>,
    summary_signal: Arc<Notify>,
    mut active: HashSet<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        top_n = cfg.max_auth_instruments,
        refresh_secs = cfg.refresh_interval.as_secs(),
        "subscription manager running"
    );

    loop {
        tokio::select! {
            _ = summary_signal.notified() => {}
            _ = tokio::time::sleep(cfg.refresh_interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        let snapshot = summaries.read().clone();
        if snapshot.is_empty() {
            debug!("no book summary yet, keeping current subscriptions");
            continue;
        }

        let desired: HashSet<String> =
            top_by_open_interest(&snapshot, cfg.max_auth_instruments)
                .into_iter()
                .collect();
        let (to_subscribe, to_unsubscribe) = diff_subscriptions(&active, &desired);

        if to_subscribe.is_empty() && to_unsubscribe.is_empty() {
            continue;
        }

        if send_channel_rpcs(&outbound, "public/unsubscribe", &to_unsubscribe)
            .await
            .is_err()
            || send_channel_rpcs(&outbound, "public/subscribe", &to_subscribe)
                .await
                .is_err()
        {
            warn!("message pump gone, subscription manager stopping");
            break;
        }

        debug!(
            subscribed = to_subscribe.len(),
            unsubscribed = to_unsubscribe.len(),
            active = desired.len(),
            "subscription set updated"
        );
        active = desired;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(name: &str, oi: f64) -> Value {
        json!({"instrument_name": name, "open_interest": oi})
    }

    #[test]
    fn ranks_descending_and_truncates() {
        let entries = vec![
            summary("A", 5.0),
            summary("B", 50.0),
            summary("C", 20.0),
            summary("D", 0.5),
        ];
        assert_eq!(top_by_open_interest(&entries, 2), vec!["B", "C"]);
    }

    #[test]
    fn drops_entries_missing_name_or_numeric_oi() {
        let entries = vec![
            json!({"open_interest": 10.0}),
            json!({"instrument_name": "X", "open_interest": "lots"}),
            json!({"instrument_name": "Y"}),
            summary("Z", 1.0),
        ];
        assert_eq!(top_by_open_interest(&entries, 10), vec!["Z"]);
    }

    #[test]
    fn diff_splits_arrivals_and_departures() {
        let active: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let desired: HashSet<String> = ["B", "C"].iter().map(|s| s.to_string()).collect();
        let (to_sub, to_unsub) = diff_subscriptions(&active, &desired);
        assert_eq!(to_sub, vec!["C".to_string()]);
        assert_eq!(to_unsub, vec!["A".to_string()]);
    }

    #[test]
    fn diff_of_equal_sets_is_empty() {
        let set: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let (to_sub, to_unsub) = diff_subscriptions(&set, &set.clone());
        assert!(to_sub.is_empty());
        assert!(to_unsub.is_empty());
    }

    #[test]
    fn ticker_channel_format() {
        assert_eq!(
            ticker_channel("BTC-24MAY25-60000-P"),
            "ticker.BTC-24MAY25-60000-P.100ms"
        );
    }

    #[tokio::test]
    async fn channel_rpcs_are_chunked_at_forty() {
        let (tx, mut rx) = mpsc::channel::<String>(16);
        let instruments: Vec<String> = (0..90).map(|i| format!("I{i}")).collect();
        send_channel_rpcs(&tx, "public/subscribe", &instruments)
            .await
            .unwrap();
        drop(tx);

        let mut sizes = Vec::new();
        while let Some(raw) = rx.recv().await {
            let value: Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(value["method"], "public/subscribe");
            assert_eq!(value["jsonrpc"], "2.0");
            sizes.push(value["params"]["channels"].as_array().unwrap().len());
        }
        assert_eq!(sizes, vec![40, 40, 10]);
    }
}
