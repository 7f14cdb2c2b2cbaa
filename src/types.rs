// =============================================================================
// Shared records of the dealer-flow pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

/// Per-instrument risk entry held in the processor's in-memory book.
///
/// Created on the first ticker for an instrument and overwritten on each
/// subsequent one (last-write-wins). Entries are never removed; a stale
/// instrument simply keeps its last observed state.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentRisk {
    pub gamma: f64,
    pub vanna: f64,
    pub charm: f64,
    pub volga: f64,
    /// `open_interest × underlying_price` in USD at the time of the ticker.
    pub notional_usd: f64,
    pub strike: f64,
    /// Customer-side marker consumed by dealer-net inference. The ticker
    /// feed never populates it; a future trade feed would.
    pub side: Option<String>,
}

/// Aggregate metrics record published to the `dealer_metrics` stream once
/// per publish tick. Field names on the wire match the warehouse columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Wall time of publish, fractional seconds since the epoch.
    pub ts: f64,
    /// Latest spot from the price index.
    pub price: f64,
    /// Ticker messages seen in the trailing 1.0 s.
    pub msg_rate: u64,
    /// Net Gamma Impact: dollar gamma for a 1% spot move.
    #[serde(rename = "NGI")]
    pub ngi: f64,
    /// Vanna Squeeze Size: dollar vanna for a 1 vol-point move.
    #[serde(rename = "VSS")]
    pub vss: f64,
    /// Charm Load: 24-hour delta decay in dollars.
    #[serde(rename = "CHL_24h")]
    pub chl_24h: f64,
    /// Volga Exposure: dollar volga for a 1 vol-point move.
    #[serde(rename = "VOLG")]
    pub volg: f64,
    /// Signed distance (strike/spot - 1) of the first gamma sign change,
    /// when one exists.
    pub flip_pct: Option<f64>,
    /// Hedge-Pressure Projection.
    #[serde(rename = "HPP")]
    pub hpp: f64,
    /// Scenario bucket from the classifier.
    pub scenario: String,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_record_wire_names() {
        let record = MetricsRecord {
            ts: 1_700_000_000.5,
            price: 64000.0,
            msg_rate: 120,
            ngi: 12000.0,
            vss: 82000.0,
            chl_24h: -3835.6,
            volg: 84000.0,
            flip_pct: None,
            hpp: 8416.44,
            scenario: "Neutral".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["NGI"], 12000.0);
        assert_eq!(value["VSS"], 82000.0);
        assert_eq!(value["CHL_24h"], -3835.6);
        assert_eq!(value["VOLG"], 84000.0);
        assert_eq!(value["HPP"], 8416.44);
        assert!(value["flip_pct"].is_null());
        assert_eq!(value["scenario"], "Neutral");

        let back: MetricsRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.msg_rate, 120);
        assert_eq!(back.flip_pct, None);
    }
}
