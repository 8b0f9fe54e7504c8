//! `GET /metrics` — SPEC_FULL.md §3 supplement. Gated by the `metrics`
//! config toggle; shape is deliberately unpinned beyond Prometheus text
//! exposition format (spec.md §1 non-goal: "Prometheus metric shape
//! details").

use crate::error::{ApiError, ApiResult};
use crate::pipeline::SharedState;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::sync::atomic::Ordering;

pub async fn metrics(State(state): State<SharedState>) -> ApiResult<Response> {
    if !state.config.metrics_enabled {
        return Err(ApiError::NotFound("metrics endpoint disabled".to_string()));
    }

    let stats = state.transactions.stats();
    let body = format!(
        "# HELP mindb_gate_in_use Execution gate permits currently held.\n\
         # TYPE mindb_gate_in_use gauge\n\
         mindb_gate_in_use {}\n\
         # HELP mindb_gate_available Execution gate permits currently free.\n\
         # TYPE mindb_gate_available gauge\n\
         mindb_gate_available {}\n\
         # HELP mindb_transactions_open Open explicit transactions.\n\
         # TYPE mindb_transactions_open gauge\n\
         mindb_transactions_open {}\n\
         # HELP mindb_sessions_active Active sessions in the store.\n\
         # TYPE mindb_sessions_active gauge\n\
         mindb_sessions_active {}\n\
         # HELP mindb_requests_total Requests served since startup.\n\
         # TYPE mindb_requests_total counter\n\
         mindb_requests_total {}\n",
        state.gate.in_use(),
        state.gate.available(),
        stats.total,
        state.sessions.session_count(),
        state.requests_total.load(Ordering::Relaxed),
    );

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
