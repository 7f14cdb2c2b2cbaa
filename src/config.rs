// =============================================================================
// Service Configuration — environment-driven, loaded once at startup
// =============================================================================
//
// Every service binary calls `Config::from_env()` after `dotenv::dotenv()`.
// Missing variables fall back to defaults that point at the public Deribit
// endpoints and local Redis/ClickHouse instances; only malformed numeric
// values are errors.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};

/// Default top-N target size for authenticated dynamic subscription.
const DEFAULT_MAX_AUTH_INSTRUMENTS: usize = 100;
/// Default floor for the subscription manager's periodic resync.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;

/// Runtime configuration shared by the collector, processor and writer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deribit WebSocket endpoint.
    pub deribit_ws: String,
    /// Deribit REST base URL, used for OAuth and instrument enumeration.
    pub deribit_rest: String,
    /// OAuth2 client credentials. Either one missing puts the collector in
    /// unauthenticated mode (no dynamic subscription).
    pub deribit_id: Option<String>,
    pub deribit_secret: Option<String>,
    /// Number of instruments the subscription manager targets, by open
    /// interest.
    pub max_auth_instruments: usize,
    /// Floor on how often the subscription manager re-syncs even without a
    /// fresh book summary.
    pub refresh_interval: Duration,
    /// Redis endpoint backing the stream log.
    pub redis_url: String,
    /// ClickHouse HTTP endpoint pieces.
    pub clickhouse_host: String,
    pub clickhouse_port: u16,
    pub clickhouse_db_name: String,
    pub clickhouse_user: String,
    pub clickhouse_password: String,
    /// Base currency, e.g. "BTC". Lower-cased where channel names need it.
    pub currency: String,
    /// Listen address for the HTTP snapshot endpoint.
    pub snapshot_bind_addr: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary lookup function. Split out of
    /// [`Config::from_env`] so tests can inject values without touching the
    /// process environment.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let max_auth_instruments = match get("DERIBIT_MAX_AUTH_INSTRUMENTS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid DERIBIT_MAX_AUTH_INSTRUMENTS: {raw}"))?,
            None => DEFAULT_MAX_AUTH_INSTRUMENTS,
        };

        let refresh_secs = match get("DYNAMIC_SUBSCRIPTION_REFRESH_INTERVAL_SECONDS") {
            Some(raw) => raw.parse::<u64>().with_context(|| {
                format!("invalid DYNAMIC_SUBSCRIPTION_REFRESH_INTERVAL_SECONDS: {raw}")
            })?,
            None => DEFAULT_REFRESH_INTERVAL_SECS,
        };

        let clickhouse_port = match get("CLICKHOUSE_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid CLICKHOUSE_PORT: {raw}"))?,
            None => 8123,
        };

        Ok(Self {
            deribit_ws: string_or("DERIBIT_WS", "wss://www.deribit.com/ws/api/v2"),
            deribit_rest: string_or("DERIBIT_REST", "https://www.deribit.com/api/v2"),
            deribit_id: get("DERIBIT_ID").filter(|v| !v.is_empty()),
            deribit_secret: get("DERIBIT_SECRET").filter(|v| !v.is_empty()),
            max_auth_instruments,
            refresh_interval: Duration::from_secs(refresh_secs),
            redis_url: string_or("REDIS_URL", "redis://localhost:6379/0"),
            clickhouse_host: string_or("CLICKHOUSE_HOST", "localhost"),
            clickhouse_port,
            clickhouse_db_name: string_or("CLICKHOUSE_DB_NAME", "default"),
            clickhouse_user: string_or("CLICKHOUSE_USER", "default"),
            clickhouse_password: string_or("CLICKHOUSE_PASSWORD", ""),
            currency: string_or("CURRENCY", "BTC"),
            snapshot_bind_addr: string_or("SNAPSHOT_BIND_ADDR", "0.0.0.0:8000"),
        })
    }

    /// Whether OAuth2 credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.deribit_id.is_some() && self.deribit_secret.is_some()
    }

    /// ClickHouse HTTP URL for the `clickhouse` crate client.
    pub fn clickhouse_url(&self) -> String {
        format!("http://{}:{}", self.clickhouse_host, self.clickhouse_port)
    }
}
