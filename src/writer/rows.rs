// =============================================================================
// ClickHouse row types and stream-payload parsers
// =============================================================================
//
// Two stream families land in two tables. A metrics entry is one row; a
// book-summary entry carries `{ts, summary_data: [...]}` and fans out to one
// row per instrument, all tagged with the outer ts as `received_ts`.
// Parsers are lenient about missing fields (the warehouse keeps whatever the
// exchange sent) but a payload that is not JSON of the right shape errors,
// and the caller drops it.
// =============================================================================

use anyhow::{Context, Result};
use clickhouse::Row;
use serde::{Deserialize, Serialize};

pub const TABLE_DEALER_METRICS: &str = "dealer_flow_metrics_v1";
pub const TABLE_INSTRUMENT_SUMMARIES: &str = "deribit_instrument_summaries_v1";

fn default_scenario() -> String {
    "Unknown".to_string()
}

/// One row of `dealer_flow_metrics_v1`, column order matching the table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct DealerMetricsRow {
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub msg_rate: u64,
    #[serde(rename = "NGI", default)]
    pub ngi: f64,
    #[serde(rename = "VSS", default)]
    pub vss: f64,
    #[serde(rename = "CHL_24h", default)]
    pub chl_24h: f64,
    #[serde(rename = "VOLG", default)]
    pub volg: f64,
    #[serde(default)]
    pub flip_pct: Option<f64>,
    #[serde(rename = "HPP", default)]
    pub hpp: f64,
    #[serde(default = "default_scenario")]
    pub scenario: String,
}

/// One row of `deribit_instrument_summaries_v1`: the book-summary fields as
/// delivered, plus the receive timestamp.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct InstrumentSummaryRow {
    #[serde(default)]
    pub received_ts: f64,
    #[serde(default)]
    pub instrument_name: String,
    #[serde(default)]
    pub underlying_price: Option<f64>,
    #[serde(default)]
    pub underlying_index: Option<String>,
    #[serde(default)]
    pub quote_currency: Option<String>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub volume_usd: Option<f64>,
    #[serde(default)]
    pub bid_iv: Option<f64>,
    #[serde(default)]
    pub ask_iv: Option<f64>,
    #[serde(default)]
    pub mark_iv: Option<f64>,
    #[serde(default)]
    pub interest_rate: f64,
}

/// Parse one `dealer_metrics` payload into its single row. A missing ts is
/// stamped with the receive time.
pub fn parse_metrics_rows(payload: &[u8], now: f64) -> Result<Vec<DealerMetricsRow>> {
    let mut row: DealerMetricsRow =
        serde_json::from_slice(payload).context("metrics payload is not a JSON record")?;
    if row.ts <= 0.0 {
        row.ts = now;
    }
    Ok(vec![row])
}

/// Parse one book-summary payload into its per-instrument rows.
pub fn parse_summary_rows(payload: &[u8], now: f64) -> Result<Vec<InstrumentSummaryRow>> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(default)]
        ts: f64,
        #[serde(default)]
        summary_data: Vec<serde_json::Value>,
    }

    let envelope: Envelope =
        serde_json::from_slice(payload).context("summary payload is not a JSON envelope")?;
    let received_ts = if envelope.ts > 0.0 { envelope.ts } else { now };

    let mut rows = Vec::with_capacity(envelope.summary_data.len());
    for item in envelope.summary_data {
        let mut row: InstrumentSummaryRow =
            serde_json::from_value(item).context("malformed instrument summary")?;
        row.received_ts = received_ts;
        rows.push(row);
    }
    Ok(rows)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metrics_payload_maps_to_one_row() {
        let payload = json!({
            "ts": 1_700_000_000.25,
            "price": 64000.0,
            "msg_rate": 340,
            "NGI": 12000.0,
            "VSS": 82000.0,
            "CHL_24h": -3835.6,
            "VOLG": 84000.0,
            "flip_pct": 0.05,
            "HPP": 19816.44,
            "scenario": "Vanna Squeeze"
        })
        .to_string();
        let rows = parse_metrics_rows(payload.as_bytes(), 0.0).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.ts, 1_700_000_000.25);
        assert_eq!(row.msg_rate, 340);
        assert_eq!(row.ngi, 12000.0);
        assert_eq!(row.flip_pct, Some(0.05));
        assert_eq!(row.scenario, "Vanna Squeeze");
    }

    #[test]
    fn metrics_defaults_cover_sparse_payloads() {
        let rows = parse_metrics_rows(br#"{"price": 100.0, "flip_pct": null}"#, 1234.5).unwrap();
        let row = &rows[0];
        assert_eq!(row.ts, 1234.5);
        assert_eq!(row.price, 100.0);
        assert_eq!(row.ngi, 0.0);
        assert_eq!(row.flip_pct, None);
        assert_eq!(row.scenario, "Unknown");
    }

    #[test]
    fn summary_envelope_fans_out_one_row_per_instrument() {
        let items: Vec<serde_json::Value> = (0..37)
            .map(|i| {
                json!({
                    "instrument_name": format!("BTC-26SEP25-{}-C", 40000 + i * 1000),
                    "underlying_price": 64000.0,
                    "underlying_index": "BTC-26SEP25",
                    "quote_currency": "USD",
                    "open_interest": 100.0 + i as f64,
                    "volume": 12.0,
                    "volume_usd": 768_000.0,
                    "bid_iv": 54.0,
                    "ask_iv": 56.0,
                    "mark_iv": 55.0,
                    "interest_rate": 0.0
                })
            })
            .collect();
        let payload = json!({"ts": 1_700_000_000.5, "summary_data": items}).to_string();

        let rows = parse_summary_rows(payload.as_bytes(), 0.0).unwrap();
        assert_eq!(rows.len(), 37);
        assert!(rows.iter().all(|r| r.received_ts == 1_700_000_000.5));
        assert_eq!(rows[0].instrument_name, "BTC-26SEP25-40000-C");
        assert_eq!(rows[36].open_interest, Some(136.0));
    }

    #[test]
    fn summary_rows_keep_missing_fields_null() {
        let payload = json!({
            "ts": 10.0,
            "summary_data": [{"instrument_name": "BTC-26SEP25-40000-C"}]
        })
        .to_string();
        let rows = parse_summary_rows(payload.as_bytes(), 0.0).unwrap();
        assert_eq!(rows[0].underlying_price, None);
        assert_eq!(rows[0].mark_iv, None);
        assert_eq!(rows[0].interest_rate, 0.0);
    }

    #[test]
    fn missing_envelope_ts_falls_back_to_receive_time() {
        let payload = json!({"summary_data": [{"instrument_name": "X"}]}).to_string();
        let rows = parse_summary_rows(payload.as_bytes(), 999.0).unwrap();
        assert_eq!(rows[0].received_ts, 999.0);
    }

    #[test]
    fn malformed_payloads_error() {
        assert!(parse_metrics_rows(b"not json", 0.0).is_err());
        assert!(parse_metrics_rows(b"[1,2,3]", 0.0).is_err());
        assert!(parse_summary_rows(b"not json", 0.0).is_err());
        assert!(parse_summary_rows(br#"{"ts": 1, "summary_data": [42]}"#, 0.0).is_err());
    }
}
