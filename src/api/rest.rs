// =============================================================================
// Snapshot API — latest metrics record over HTTP
// =============================================================================
//
// A single read-only endpoint: `GET /snapshot` returns the most recent
// aggregate record from the metrics stream verbatim, or 204 while the
// processor has not published anything yet.
// =============================================================================

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;
use redis::AsyncCommands;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::redis_stream::{self, STREAM_METRICS};

#[derive(Clone)]
pub struct ApiState {
    pub redis: ConnectionManager,
}

/// Build the snapshot router with CORS middleware.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/snapshot", get(snapshot))
        .layer(cors)
        .with_state(state)
}

async fn snapshot(State(state): State<ApiState>) -> Response {
    let mut redis = state.redis.clone();
    let reply: redis::RedisResult<StreamRangeReply> =
        redis.xrevrange_count(STREAM_METRICS, "+", "-", 1).await;

    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "snapshot read failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(entry) = reply.ids.first() else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let Some(payload) = redis_stream::entry_payload(entry) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match serde_json::from_slice::<serde_json::Value>(&payload) {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => {
            warn!(error = %e, "stored metrics record is not JSON");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
