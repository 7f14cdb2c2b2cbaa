// =============================================================================
// Collector — reconnecting Deribit subscription client
// =============================================================================
//
// Connection lifecycle per session:
//
//   DISCONNECTED -> AUTHENTICATING -> CONNECTED -> BASE_SUBSCRIBED
//                -> OPERATIONAL -> (DISCONNECTED)
//
// AUTHENTICATING acquires (or reuses) an OAuth2 bearer; absent credentials
// degrade to an unauthenticated session. CONNECTED opens the WebSocket with
// the bearer header and a 20 s ping keepalive. BASE_SUBSCRIBED subscribes
// the spot index and the option book-summary channel, then seeds the
// initial ticker working set from REST. OPERATIONAL pumps messages while
// the subscription manager (authenticated sessions only) keeps tickers in
// sync with the top-N by open interest.
//
// Any error or closure tears the session down, waits 5 s and restarts from
// AUTHENTICATING. The active subscription set is cleared with the session.
// =============================================================================

pub mod auth;
pub mod instruments;
pub mod subscriptions;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::redis_stream::{self, STREAM_RAW, STREAM_SUMMARIES};

use auth::AuthManager;
use subscriptions::{ticker_channel, MAX_CHANNELS_PER_REQUEST};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Pause before restarting a failed session.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Receive idleness after which we nudge the peer's liveness checker.
const IDLE_RECV_TIMEOUT: Duration = Duration::from_secs(5);
/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(20);
/// Interval requested via `public/set_heartbeat`.
const HEARTBEAT_INTERVAL_SECS: u64 = 15;
/// Pause between chunked RPCs issued directly on the sink.
const CHUNK_GAP: Duration = Duration::from_millis(100);
/// Raw-stream push count between progress logs.
const PUSH_LOG_EVERY: u64 = 5000;

/// How a session ended: deliberately, or by losing the connection.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Build a JSON-RPC 2.0 request envelope with a fresh id.
pub fn rpc_request(method: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": method,
        "params": params,
    })
    .to_string()
}

fn price_index_channel(currency: &str) -> String {
    format!("deribit_price_index.{}_usd", currency.to_lowercase())
}

fn book_summary_channel(currency: &str) -> String {
    format!("book_summary.option.{currency}.all")
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Collector service loop: run sessions forever, backing off 5 s between
/// attempts, until shutdown.
pub async fn run(
    cfg: Arc<Config>,
    redis: ConnectionManager,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .context("failed to build HTTP client")?;
    let mut auth = AuthManager::new(http.clone(), &cfg);

    info!(currency = %cfg.currency, "collector starting");

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match run_session(&cfg, &mut auth, &http, redis.clone(), shutdown.clone()).await {
            Ok(SessionEnd::Shutdown) => {
                info!("collector shut down");
                return Ok(());
            }
            Ok(SessionEnd::Disconnected) => {
                warn!("WebSocket closed, reconnecting in 5s");
            }
            Err(e) => {
                warn!(error = %e, "collector session failed, reconnecting in 5s");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

/// One full pass through the connection lifecycle.
async fn run_session(
    cfg: &Arc<Config>,
    auth: &mut AuthManager,
    http: &reqwest::Client,
    redis: ConnectionManager,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionEnd> {
    // ── AUTHENTICATING ───────────────────────────────────────────────────
    let token = auth.bearer().await;
    let authenticated = token.is_some();

    let initial = match instruments::fetch_instruments(http, &cfg.deribit_rest, &cfg.currency).await
    {
        Ok(list) => instruments::select_working_set(&list, authenticated, cfg.max_auth_instruments),
        Err(e) => {
            warn!(error = %e, "instrument enumeration failed, starting with base channels only");
            Vec::new()
        }
    };

    // ── CONNECTED ────────────────────────────────────────────────────────
    let mut request = cfg
        .deribit_ws
        .as_str()
        .into_client_request()
        .context("invalid WebSocket URL")?;
    if let Some(token) = &token {
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .context("bearer token is not a valid header value")?,
        );
    }

    let (ws, _response) = connect_async(request)
        .await
        .context("WebSocket connect failed")?;
    info!(
        mode = if authenticated { "auth" } else { "unauth" },
        "WebSocket connected"
    );
    let (mut sink, stream) = ws.split();

    // ── BASE_SUBSCRIBED ──────────────────────────────────────────────────
    let base_channels = vec![
        price_index_channel(&cfg.currency),
        book_summary_channel(&cfg.currency),
    ];
    sink.send(Message::Text(rpc_request(
        "public/subscribe",
        json!({ "channels": base_channels }),
    )))
    .await
    .context("base subscribe failed")?;

    for chunk in initial.chunks(MAX_CHANNELS_PER_REQUEST) {
        let channels: Vec<String> = chunk.iter().map(|i| ticker_channel(i)).collect();
        sink.send(Message::Text(rpc_request(
            "public/subscribe",
            json!({ "channels": channels }),
        )))
        .await
        .context("initial ticker subscribe failed")?;
        tokio::time::sleep(CHUNK_GAP).await;
    }
    info!(tickers = initial.len(), "base channels subscribed");

    // ── OPERATIONAL ──────────────────────────────────────────────────────
    let summaries: Arc<RwLock<Vec<Value>>> = Arc::new(RwLock::new(Vec::new()));
    let summary_signal = Arc::new(Notify::new());
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);

    let manager = if authenticated {
        let active: HashSet<String> = initial.into_iter().collect();
        Some(tokio::spawn(subscriptions::run_manager(
            cfg.clone(),
            outbound_tx.clone(),
            summaries.clone(),
            summary_signal.clone(),
            active,
            shutdown.clone(),
        )))
    } else {
        info!("unauthenticated session: dynamic subscription disabled");
        None
    };

    let end = message_pump(
        cfg,
        redis,
        sink,
        stream,
        outbound_rx,
        summaries,
        summary_signal,
        shutdown,
    )
    .await;

    if let Some(handle) = manager {
        handle.abort();
    }
    end
}

/// Pump inbound messages and forward outbound subscription RPCs until the
/// connection drops or shutdown is signalled.
#[allow(clippy::too_many_arguments)]
async fn message_pump(
    cfg: &Arc<Config>,
    mut redis: ConnectionManager,
    mut sink: WsSink,
    mut stream: WsSource,
    mut outbound_rx: mpsc::Receiver<String>,
    summaries: Arc<RwLock<Vec<Value>>>,
    summary_signal: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    let mut pushed: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "shutdown".into(),
                        })))
                        .await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
            Some(outgoing) = outbound_rx.recv() => {
                sink.send(Message::Text(outgoing))
                    .await
                    .context("WebSocket send failed")?;
            }
            _ = ping.tick() => {
                sink.send(Message::Ping(Vec::new()))
                    .await
                    .context("WebSocket ping failed")?;
            }
            inbound = tokio::time::timeout(IDLE_RECV_TIMEOUT, stream.next()) => match inbound {
                // Nothing received for 5 s: ask the peer to run its own
                // heartbeat so the connection stays provably alive.
                Err(_) => {
                    sink.send(Message::Text(rpc_request(
                        "public/set_heartbeat",
                        json!({ "interval": HEARTBEAT_INTERVAL_SECS }),
                    )))
                    .await
                    .context("set_heartbeat failed")?;
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    handle_frame(
                        cfg,
                        &mut redis,
                        &mut sink,
                        &summaries,
                        &summary_signal,
                        &mut pushed,
                        &text,
                    )
                    .await?;
                }
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    sink.send(Message::Pong(payload))
                        .await
                        .context("pong failed")?;
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    warn!(?frame, "WebSocket closed by peer");
                    return Ok(SessionEnd::Disconnected);
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    return Err(e).context("WebSocket read error");
                }
                Ok(None) => {
                    return Ok(SessionEnd::Disconnected);
                }
            }
        }
    }
}

/// Route one inbound text frame.
async fn handle_frame(
    cfg: &Arc<Config>,
    redis: &mut ConnectionManager,
    sink: &mut WsSink,
    summaries: &Arc<RwLock<Vec<Value>>>,
    summary_signal: &Arc<Notify>,
    pushed: &mut u64,
    text: &str,
) -> Result<()> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable WebSocket frame");
            return Ok(());
        }
    };

    match value.get("method").and_then(Value::as_str) {
        Some("subscription") => {
            let channel = value
                .pointer("/params/channel")
                .and_then(Value::as_str)
                .unwrap_or_default();

            if channel.starts_with("book_summary") {
                let data = value
                    .pointer("/params/data")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                debug!(instruments = data.len(), "book summary received");
                *summaries.write() = data.clone();
                summary_signal.notify_one();

                let doc = json!({ "ts": unix_now(), "summary_data": data });
                if let Err(e) =
                    redis_stream::publish(redis, STREAM_SUMMARIES, doc.to_string().as_bytes()).await
                {
                    warn!(error = %e, "failed to push book summary to stream log");
                }
            } else {
                // Price index and tickers travel verbatim.
                if let Err(e) = redis_stream::publish(redis, STREAM_RAW, text.as_bytes()).await {
                    warn!(error = %e, "failed to push raw message to stream log");
                } else {
                    *pushed += 1;
                    if *pushed % PUSH_LOG_EVERY == 0 {
                        info!(pushed = *pushed, currency = %cfg.currency, "raw messages pushed");
                    }
                }
            }
        }
        Some("heartbeat") => {
            if value.pointer("/params/type").and_then(Value::as_str) == Some("test_request") {
                sink.send(Message::Text(rpc_request("public/test", json!({}))))
                    .await
                    .context("test_request reply failed")?;
            }
        }
        _ => {
            if let Some(err) = value.get("error") {
                // Subscription rejections are logged, never fatal.
                warn!(error = %err, "JSON-RPC error reply");
            } else if value.get("id").is_some() && value.get("result").is_some() {
                debug!(id = %value["id"], "RPC reply");
            } else {
                debug!("unhandled frame");
            }
        }
    }

    Ok(())
}
