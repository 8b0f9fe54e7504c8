//! C8: endpoint handlers. Each module implements one group from
//! spec.md §4.7; this file wires them into the route table and holds
//! the shared helpers (deadline-bounded engine calls, database-header
//! extraction, gate admission) every handler needs.

pub mod auth_routes;
pub mod batch;
pub mod execute;
pub mod health;
pub mod metrics;
pub mod procedures;
pub mod query;
pub mod stream;
pub mod tx;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::SharedState;
use axum::routing::{delete, get, post};
use axum::Router;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn routes(_state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/query", post(query::query))
        .route("/execute", post(execute::execute))
        .route("/query/batch", post(batch::batch))
        .route("/stream", get(stream::stream))
        .route("/tx/begin", post(tx::begin))
        .route("/tx/:id/exec", post(tx::exec))
        .route("/tx/:id/commit", post(tx::commit))
        .route("/tx/:id/rollback", post(tx::rollback))
        .route("/procedures", post(procedures::create).get(procedures::list))
        .route("/procedures/:name", delete(procedures::drop))
        .route("/procedures/:name/call", post(procedures::call))
        .route("/auth/logout", post(auth_routes::logout))
        .route("/auth/refresh", post(auth_routes::refresh))
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
}

/// Reads `X-Mindb-Database`, defaulting to the empty string (which the
/// engine adapter resolves to its own default database) — spec.md §6.
pub fn target_database(request_headers: &axum::http::HeaderMap) -> String {
    request_headers
        .get("X-Mindb-Database")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

pub fn remote_client_id(extensions: &axum::http::Extensions) -> String {
    extensions
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|addr| addr.0.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Runs a synchronous engine call on a blocking thread, racing it
/// against `deadline`. A deadline hit cancels the token (so the
/// adapter's next pre-flight check bails out, per spec.md §4.2) and
/// returns `ApiError::Timeout` without waiting for the blocking task —
/// the engine call is treated as synchronous and un-interruptible, so
/// the task is left to finish in the background (spec.md §5 "the engine
/// call is not re-entered").
pub async fn run_with_deadline<T, F>(deadline: Duration, cancel: CancellationToken, f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Timeout),
        _ = tokio::time::sleep(deadline) => {
            cancel.cancel();
            Err(ApiError::Timeout)
        }
        joined = handle => match joined {
            Ok(result) => result,
            Err(e) => Err(ApiError::Internal(format!("engine task failed: {e}"))),
        }
    }
}

pub fn latency_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub const SESSION_COOKIE: &str = "mindb_session";

pub fn session_cookie(headers: &axum::http::HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    header.split(';').map(|part| part.trim()).find_map(|part| {
        let (k, v) = part.split_once('=')?;
        (k == SESSION_COOKIE).then(|| v.to_string())
    })
}

pub fn set_cookie_header(value: &str, max_age_secs: i64, secure: bool) -> axum::http::HeaderValue {
    let secure_flag = if secure { "; Secure" } else { "" };
    let raw = format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}{secure_flag}");
    axum::http::HeaderValue::from_str(&raw).unwrap_or_else(|_| axum::http::HeaderValue::from_static(""))
}
