//! `POST /execute` — spec.md §4.7, "shape mirrors `/query`".

use super::{latency_ms, run_with_deadline, target_database};
use crate::engine::QueryResult;
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
pub struct ExecuteRequest {
    pub sql: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub affected_rows: u64,
    pub returning: Option<QueryResult>,
    pub latency_ms: u64,
}

pub async fn execute(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Extension(request_cancel): Extension<CancellationToken>,
    Json(body): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecuteResponse>> {
    state.record_request();
    let start = Instant::now();

    if body.sql.trim().is_empty() {
        return Err(ApiError::BadRequest("sql must not be empty".to_string()));
    }

    let cancel = request_cancel.child_token();
    let _permit = state.gate.acquire(&cancel).await?;
    let db = target_database(&headers);
    let deadline = body.timeout_ms.map(std::time::Duration::from_millis).unwrap_or(state.config.statement_timeout);

    let engine = state.engine.clone();
    let args = body.args.clone();
    let sql = body.sql.clone();
    let cancel_for_task = cancel.clone();
    let result = run_with_deadline(deadline, cancel, move || engine.execute(&cancel_for_task, &db, &sql, &args)).await?;

    Ok(Json(ExecuteResponse {
        affected_rows: result.affected_rows,
        returning: result.returning,
        latency_ms: latency_ms(start),
    }))
}
