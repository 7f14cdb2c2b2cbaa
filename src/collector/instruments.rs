// =============================================================================
// Instrument enumeration — the session's initial working set
// =============================================================================
//
// Each session starts from a REST snapshot of live option instruments.
// Authenticated sessions seed the top-N by open interest (the subscription
// manager keeps the set in sync from book summaries afterwards);
// unauthenticated sessions take the first few instruments in API order and
// keep them for the whole session.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use super::subscriptions::top_by_open_interest;

/// Working-set size for unauthenticated sessions.
pub const MAX_UNAUTH_INSTRUMENTS: usize = 12;

/// Fetch the live (non-expired) option instruments for `currency`.
pub async fn fetch_instruments(
    http: &reqwest::Client,
    rest_base: &str,
    currency: &str,
) -> Result<Vec<Value>> {
    let url = format!("{rest_base}/public/get_instruments");
    let resp = http
        .get(&url)
        .query(&[("currency", currency), ("kind", "option"), ("expired", "false")])
        .send()
        .await
        .context("get_instruments request failed")?;

    let status = resp.status();
    let body: Value = resp.json().await.context("get_instruments response not JSON")?;
    if !status.is_success() {
        anyhow::bail!("get_instruments returned {status}: {body}");
    }

    match body.get("result") {
        Some(Value::Array(list)) => Ok(list.clone()),
        _ => {
            warn!("get_instruments result is not an array");
            Ok(Vec::new())
        }
    }
}

/// Pick the instruments a fresh session subscribes tickers for.
pub fn select_working_set(instruments: &[Value], authenticated: bool, top_n: usize) -> Vec<String> {
    if authenticated {
        top_by_open_interest(instruments, top_n)
    } else {
        instruments
            .iter()
            .filter_map(|entry| entry.get("instrument_name").and_then(Value::as_str))
            .take(MAX_UNAUTH_INSTRUMENTS)
            .map(str::to_owned)
            .collect()
    }
}
