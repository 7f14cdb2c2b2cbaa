// =============================================================================
// Risk book — per-instrument sensitivities and the publish-time aggregate
// =============================================================================
//
// The book is fed raw JSON-RPC subscription payloads from the log: price
// index updates set the spot, ticker updates upsert one instrument's entry
// (last-write-wins). Gamma from the Black-Scholes kernel is authoritative
// whenever its inputs are valid; vanna, charm and volga only fill values
// the feed did not supply. Entries are never removed.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::flow::{
    classify, dealer_side_multiplier, gamma_flip_distance, hpp, roll_up, SignedExposure,
};
use crate::greeks::black_scholes_greeks;
use crate::instrument::parse_instrument;
use crate::types::{InstrumentRisk, MetricsRecord};

/// Receive-time ring size backing the msg_rate gauge.
const TICK_RING_CAPACITY: usize = 1000;
/// Trailing window over which msg_rate counts, in seconds.
const MSG_RATE_WINDOW: f64 = 1.0;
/// Year length used for time-to-expiry.
const SECONDS_PER_YEAR: f64 = 365.0 * 86400.0;

/// What one raw log entry turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Spot,
    Ticker,
    Ignored,
}

/// The processor's mutable state between publishes.
pub struct RiskBook {
    spot: f64,
    last_pub_price: f64,
    instruments: HashMap<String, InstrumentRisk>,
    tick_times: VecDeque<f64>,
}

impl Default for RiskBook {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskBook {
    pub fn new() -> Self {
        Self {
            spot: 0.0,
            last_pub_price: 0.0,
            instruments: HashMap::new(),
            tick_times: VecDeque::with_capacity(TICK_RING_CAPACITY),
        }
    }

    pub fn spot(&self) -> f64 {
        self.spot
    }

    pub fn last_pub_price(&self) -> f64 {
        self.last_pub_price
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn instrument(&self, name: &str) -> Option<&InstrumentRisk> {
        self.instruments.get(name)
    }

    /// Apply one raw log entry. Malformed entries error without touching
    /// any state; the caller logs and moves on.
    pub fn apply_raw(&mut self, payload: &[u8], now: f64) -> Result<Applied> {
        let value: Value = serde_json::from_slice(payload).context("payload is not JSON")?;

        let channel = match value.pointer("/params/channel").and_then(Value::as_str) {
            Some(c) => c,
            None => bail!("payload has no params.channel"),
        };
        let data = match value.pointer("/params/data") {
            Some(Value::Object(map)) => map,
            _ => bail!("payload has no params.data object"),
        };

        if channel.to_lowercase().starts_with("deribit_price_index") {
            let price = data
                .get("price")
                .or_else(|| data.get("index_price"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if price > 0.0 {
                self.spot = price;
            }
            return Ok(Applied::Spot);
        }

        if channel.starts_with("ticker.") {
            self.apply_ticker(data, now)?;
            return Ok(Applied::Ticker);
        }

        Ok(Applied::Ignored)
    }

    fn apply_ticker(&mut self, data: &serde_json::Map<String, Value>, now: f64) -> Result<()> {
        let name = data
            .get("instrument_name")
            .and_then(Value::as_str)
            .context("ticker without instrument_name")?;
        let parsed = parse_instrument(name)?;

        let ts_secs = data
            .get("timestamp")
            .and_then(Value::as_f64)
            .map(|ms| ms / 1000.0)
            .unwrap_or(now);
        let t_years = (parsed.expiry_ts - ts_secs).max(0.0) / SECONDS_PER_YEAR;

        let open_interest = data.get("open_interest").and_then(Value::as_f64).unwrap_or(0.0);
        let mark_price = data.get("mark_price").and_then(Value::as_f64).unwrap_or(0.0);
        let underlying = if self.spot > 0.0 { self.spot } else { mark_price };
        let notional_usd = if underlying > 0.0 {
            open_interest * underlying
        } else {
            0.0
        };

        let feed = data.get("greeks");
        let feed_greek = |key: &str| feed.and_then(|g| g.get(key)).and_then(Value::as_f64);
        let feed_gamma = feed_greek("gamma");
        let feed_vanna = feed_greek("vanna");
        let feed_charm = feed_greek("charm");
        let feed_volga = feed_greek("volga");

        let sigma = data.get("mark_iv").and_then(Value::as_f64).unwrap_or(0.0) / 100.0;

        let (gamma, vanna, charm, volga) = if sigma > 0.0 && t_years > 0.0 && underlying > 0.0 {
            let bs = black_scholes_greeks(underlying, parsed.strike, t_years, 0.0, sigma);
            // Model gamma is authoritative; the rest only fill gaps.
            (
                bs.gamma,
                feed_vanna.unwrap_or(bs.vanna),
                feed_charm.unwrap_or(bs.charm),
                feed_volga.unwrap_or(bs.volga),
            )
        } else {
            (
                feed_gamma.unwrap_or(0.0),
                feed_vanna.unwrap_or(0.0),
                feed_charm.unwrap_or(0.0),
                feed_volga.unwrap_or(0.0),
            )
        };

        self.instruments.insert(
            name.to_owned(),
            InstrumentRisk {
                gamma,
                vanna,
                charm,
                volga,
                notional_usd,
                strike: parsed.strike,
                side: None,
            },
        );

        if self.tick_times.len() == TICK_RING_CAPACITY {
            self.tick_times.pop_front();
        }
        self.tick_times.push_back(now);
        Ok(())
    }

    /// Build one publish tick's aggregate record, or `None` when there is
    /// nothing meaningful to publish (no spot, empty book).
    pub fn build_metrics(&mut self, now: f64) -> Option<MetricsRecord> {
        while self
            .tick_times
            .front()
            .is_some_and(|&t| now - t > MSG_RATE_WINDOW)
        {
            self.tick_times.pop_front();
        }

        if self.spot <= 0.0 || self.instruments.is_empty() {
            return None;
        }
        let spot = self.spot;

        // Dealer-sign every entry, then aggregate.
        let mut exposures = Vec::with_capacity(self.instruments.len());
        let mut strike_rows: Vec<(f64, f64)> = Vec::with_capacity(self.instruments.len());
        let mut total_notional = 0.0;
        for risk in self.instruments.values() {
            let mult = dealer_side_multiplier(risk.side.as_deref());
            exposures.push(SignedExposure {
                gamma: risk.gamma * mult,
                vanna: risk.vanna * mult,
                charm: risk.charm * mult,
                volga: risk.volga * mult,
                notional_usd: risk.notional_usd,
            });
            strike_rows.push((risk.strike, risk.gamma * mult));
            total_notional += risk.notional_usd;
        }
        let agg = roll_up(&exposures);

        // Per-strike net gamma, rebuilt from scratch each publish.
        strike_rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut gamma_by_strike: Vec<(f64, f64)> = Vec::with_capacity(strike_rows.len());
        for (strike, gamma) in strike_rows {
            match gamma_by_strike.last_mut() {
                Some((last_strike, sum)) if *last_strike == strike => *sum += gamma,
                _ => gamma_by_strike.push((strike, gamma)),
            }
        }
        let flip_pct = gamma_flip_distance(&gamma_by_strike, spot);

        if self.last_pub_price <= 0.0 {
            self.last_pub_price = spot;
        }
        let spot_move_sign: i8 = if spot > self.last_pub_price {
            1
        } else if spot < self.last_pub_price {
            -1
        } else {
            0
        };
        let spot_change_pct = if self.last_pub_price > 0.0 {
            spot / self.last_pub_price - 1.0
        } else {
            0.0
        };

        let hpp_value = hpp(spot_move_sign, agg.ngi, agg.vss, agg.chl_24h);
        let adv_usd = (0.001 * total_notional).max(1.0);
        let scenario = classify(agg.ngi, agg.vss, adv_usd, spot_change_pct);

        self.last_pub_price = spot;

        Some(MetricsRecord {
            ts: now,
            price: spot,
            msg_rate: self.tick_times.len() as u64,
            ngi: agg.ngi,
            vss: agg.vss,
            chl_24h: agg.chl_24h,
            volg: agg.volg,
            flip_pct,
            hpp: hpp_value,
            scenario: scenario.as_str().to_owned(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::parse_instrument;
    use serde_json::json;

    const NOW: f64 = 1_716_000_000.0; // 2024-05-18

    fn index_payload(price: f64) -> Vec<u8> {
        json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "channel": "deribit_price_index.btc_usd",
                "data": { "price": price }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn ticker_payload(name: &str, greeks: Value) -> Vec<u8> {
        json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "channel": format!("ticker.{name}.100ms"),
                "data": {
                    "instrument_name": name,
                    "timestamp": NOW * 1000.0,
                    "open_interest": 150.0,
                    "mark_price": 0.05,
                    "mark_iv": 55.0,
                    "greeks": greeks
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn index_message_sets_spot() {
        let mut book = RiskBook::new();
        assert_eq!(
            book.apply_raw(&index_payload(64000.0), NOW).unwrap(),
            Applied::Spot
        );
        assert_eq!(book.spot(), 64000.0);
    }

    #[test]
    fn index_fallback_field_and_zero_guard() {
        let mut book = RiskBook::new();
        let payload = json!({
            "params": {
                "channel": "deribit_price_index.btc_usd",
                "data": { "index_price": 63000.0 }
            }
        })
        .to_string()
        .into_bytes();
        book.apply_raw(&payload, NOW).unwrap();
        assert_eq!(book.spot(), 63000.0);

        // A non-positive price leaves the previous spot alone.
        book.apply_raw(&index_payload(0.0), NOW).unwrap();
        assert_eq!(book.spot(), 63000.0);
    }

    #[test]
    fn model_gamma_overrides_feed_gamma() {
        let mut book = RiskBook::new();
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        book.apply_raw(
            &ticker_payload("BTC-24MAY25-60000-P", json!({"gamma": 0.0001, "vanna": 1.2})),
            NOW,
        )
        .unwrap();

        let risk = book.instrument("BTC-24MAY25-60000-P").unwrap();
        let parsed = parse_instrument("BTC-24MAY25-60000-P").unwrap();
        let t = (parsed.expiry_ts - NOW) / SECONDS_PER_YEAR;
        let bs = black_scholes_greeks(64000.0, 60000.0, t, 0.0, 0.55);

        assert!((risk.gamma - bs.gamma).abs() < 1e-9, "feed gamma must lose");
        assert_ne!(risk.gamma, 0.0001);
        // Supplied vanna is kept, missing charm/volga are model-filled.
        assert_eq!(risk.vanna, 1.2);
        assert!((risk.charm - bs.charm).abs() < 1e-9);
        assert!((risk.volga - bs.volga).abs() < 1e-9);
        assert_eq!(risk.notional_usd, 150.0 * 64000.0);
        assert_eq!(risk.strike, 60000.0);
    }

    #[test]
    fn invalid_model_inputs_keep_feed_values() {
        let mut book = RiskBook::new();
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        let payload = json!({
            "params": {
                "channel": "ticker.BTC-24MAY25-60000-P.100ms",
                "data": {
                    "instrument_name": "BTC-24MAY25-60000-P",
                    "timestamp": NOW * 1000.0,
                    "open_interest": 10.0,
                    "mark_iv": 0.0,
                    "greeks": { "gamma": 0.0001 }
                }
            }
        })
        .to_string()
        .into_bytes();
        book.apply_raw(&payload, NOW).unwrap();

        let risk = book.instrument("BTC-24MAY25-60000-P").unwrap();
        assert_eq!(risk.gamma, 0.0001);
        assert_eq!(risk.vanna, 0.0);
        assert_eq!(risk.charm, 0.0);
        assert_eq!(risk.volga, 0.0);
    }

    #[test]
    fn expired_instrument_has_zero_time_value() {
        let mut book = RiskBook::new();
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        // Expired in 2020; T clamps to 0 so model inputs are invalid.
        book.apply_raw(
            &ticker_payload("BTC-25SEP20-10000-C", json!({"gamma": 0.5})),
            NOW,
        )
        .unwrap();
        assert_eq!(book.instrument("BTC-25SEP20-10000-C").unwrap().gamma, 0.5);
    }

    #[test]
    fn malformed_payloads_error_without_state_changes() {
        let mut book = RiskBook::new();
        assert!(book.apply_raw(b"not json", NOW).is_err());
        assert!(book
            .apply_raw(br#"{"params": {"data": {"price": 1.0}}}"#, NOW)
            .is_err());
        assert!(book
            .apply_raw(br#"{"params": {"channel": "ticker.X.100ms", "data": 5}}"#, NOW)
            .is_err());
        // Unparseable expiry date.
        assert!(book
            .apply_raw(
                &ticker_payload("BTC-99ZZZ99-1-C", json!({})),
                NOW
            )
            .is_err());
        assert!(book.is_empty());
        assert_eq!(book.spot(), 0.0);
    }

    #[test]
    fn unknown_channels_are_ignored() {
        let mut book = RiskBook::new();
        let payload = json!({
            "params": { "channel": "quote.BTC-PERPETUAL", "data": {} }
        })
        .to_string()
        .into_bytes();
        assert_eq!(book.apply_raw(&payload, NOW).unwrap(), Applied::Ignored);
    }

    #[test]
    fn replay_is_deterministic() {
        let messages = vec![
            index_payload(64000.0),
            ticker_payload("BTC-24MAY25-60000-P", json!({"vanna": 1.2})),
            ticker_payload("BTC-27JUN25-70000-C", json!({})),
            index_payload(64100.0),
            ticker_payload("BTC-24MAY25-60000-P", json!({"vanna": 1.3})),
        ];
        let mut a = RiskBook::new();
        let mut b = RiskBook::new();
        for payload in &messages {
            a.apply_raw(payload, NOW).unwrap();
            b.apply_raw(payload, NOW).unwrap();
        }
        assert_eq!(a.len(), 2);
        assert_eq!(a.instruments, b.instruments);
        // Last write won.
        assert_eq!(a.instrument("BTC-24MAY25-60000-P").unwrap().vanna, 1.3);
    }

    #[test]
    fn publish_gating() {
        let mut book = RiskBook::new();
        // Empty book, no spot.
        assert!(book.build_metrics(NOW).is_none());
        // Spot but empty book.
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        assert!(book.build_metrics(NOW).is_none());
        // Book but the record still needs a positive spot.
        let mut no_spot = RiskBook::new();
        no_spot
            .apply_raw(&ticker_payload("BTC-24MAY25-60000-P", json!({})), NOW)
            .unwrap();
        assert!(no_spot.build_metrics(NOW).is_none());
    }

    #[test]
    fn publish_updates_last_pub_price_and_aggregates() {
        let mut book = RiskBook::new();
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        book.apply_raw(&ticker_payload("BTC-24MAY25-60000-P", json!({})), NOW)
            .unwrap();

        let record = book.build_metrics(NOW + 1.0).unwrap();
        assert_eq!(record.price, 64000.0);
        assert_eq!(book.last_pub_price(), 64000.0);
        // Flat first move, model vanna dwarfs the dollar gamma of one name.
        assert_eq!(record.scenario, "Vanna Squeeze");
        assert!(record.vss.abs() > 2.0 * record.ngi.abs());

        // NGI must equal 0.01 * sum(gamma * notional) over the book.
        let risk = book.instrument("BTC-24MAY25-60000-P").unwrap();
        let expected_ngi = risk.gamma * risk.notional_usd * 0.01;
        assert!((record.ngi - expected_ngi).abs() < 1e-9);

        // Single strike: no sign change, no flip.
        assert_eq!(record.flip_pct, None);

        // A higher spot on the next publish reads as a rising move.
        book.apply_raw(&index_payload(64128.0), NOW + 2.0).unwrap();
        let record2 = book.build_metrics(NOW + 2.0).unwrap();
        assert_eq!(book.last_pub_price(), 64128.0);
        let expected_change = 64128.0 / 64000.0 - 1.0;
        // Positive gamma on a rising move: HPP carries +NGI.
        let expected_hpp = record2.ngi + 0.1 * record2.vss + 0.1 * record2.chl_24h;
        assert!((record2.hpp - expected_hpp).abs() < 1e-9);
        assert!(expected_change > 0.0);
    }

    #[test]
    fn msg_rate_counts_only_the_trailing_second() {
        let mut book = RiskBook::new();
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        // One ticker long before the publish instant, two inside the window.
        book.apply_raw(&ticker_payload("BTC-26DEC25-90000-C", json!({})), NOW - 10.0)
            .unwrap();
        for (i, name) in ["BTC-24MAY25-60000-P", "BTC-27JUN25-70000-C"]
            .iter()
            .enumerate()
        {
            book.apply_raw(&ticker_payload(name, json!({})), NOW + i as f64 * 0.1)
                .unwrap();
        }

        let record = book.build_metrics(NOW + 0.5).unwrap();
        assert_eq!(record.msg_rate, 2);
    }

    #[test]
    fn dealer_side_marker_flips_signs() {
        let mut book = RiskBook::new();
        book.apply_raw(&index_payload(64000.0), NOW).unwrap();
        book.apply_raw(&ticker_payload("BTC-24MAY25-60000-P", json!({})), NOW)
            .unwrap();
        let unsigned_ngi = book.build_metrics(NOW).unwrap().ngi;

        book.instruments
            .get_mut("BTC-24MAY25-60000-P")
            .unwrap()
            .side = Some("customer_long".to_owned());
        let signed_ngi = book.build_metrics(NOW).unwrap().ngi;
        assert!((signed_ngi + unsigned_ngi).abs() < 1e-12);
    }
}
