//! `POST /query` — spec.md §4.7.

use super::{latency_ms, run_with_deadline, target_database};
use crate::error::{ApiError, ApiResult};
use crate::pipeline::SharedState;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
    #[serde(default)]
    pub limit: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub row_count: usize,
    pub truncated: bool,
    pub latency_ms: u64,
}

pub async fn query(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Extension(request_cancel): Extension<CancellationToken>,
    Json(body): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    state.record_request();
    let start = Instant::now();

    if body.sql.trim().is_empty() {
        return Err(ApiError::BadRequest("sql must not be empty".to_string()));
    }

    // A child of the connection-scoped token: cancelled automatically if
    // the client disconnects, but its own `cancel()` (on deadline) doesn't
    // reach back up to the connection token or any sibling request.
    let cancel = request_cancel.child_token();
    let _permit = state.gate.acquire(&cancel).await?;
    let db = target_database(&headers);
    let deadline = body.timeout_ms.map(std::time::Duration::from_millis).unwrap_or(state.config.statement_timeout);

    let engine = state.engine.clone();
    let limit = body.limit;
    let args = body.args.clone();
    let sql = body.sql.clone();
    let cancel_for_task = cancel.clone();
    let result = run_with_deadline(deadline, cancel, move || {
        engine.query(&cancel_for_task, &db, &sql, &args, limit)
    })
    .await?;

    let truncated = limit > 0 && result.rows.len() >= limit;
    Ok(Json(QueryResponse {
        row_count: result.rows.len(),
        columns: result.columns,
        rows: result.rows,
        truncated,
        latency_ms: latency_ms(start),
    }))
}
