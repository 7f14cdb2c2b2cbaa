// =============================================================================
// dealer-flow — Deribit dealer-positioning pipeline
// =============================================================================
//
// Three services share this library, decoupled through Redis streams:
//
//   collector  — authenticated Deribit WebSocket client; keeps the working
//                set of option tickers in sync with the top-N instruments
//                by open interest and appends every raw message to the log.
//   processor  — consumes the raw log, maintains an in-memory risk book
//                (Black-Scholes filled sensitivities per instrument) and
//                publishes an aggregate metrics record every second.
//   writer     — ships the metrics and book-summary logs to ClickHouse in
//                batches with at-least-once delivery.
// =============================================================================

pub mod api;
pub mod collector;
pub mod config;
pub mod flow;
pub mod greeks;
pub mod instrument;
pub mod processor;
pub mod redis_stream;
pub mod types;
pub mod writer;
