//! Transaction endpoints — spec.md §4.7 "Transaction endpoints". The
//! per-handle cancellation token stored in the registry entry is what
//! `Close`/idle-sweep uses to unblock an in-flight engine call.

use super::{latency_ms, remote_client_id, target_database};
use crate::engine::QueryResult;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::SharedState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;

#[derive(Serialize)]
pub struct BeginResponse {
    pub tx: String,
    pub isolation: &'static str,
}

pub async fn begin(
    State(state): State<SharedState>,
    headers: HeaderMap,
    request: axum::extract::Request,
) -> ApiResult<Json<BeginResponse>> {
    state.record_request();
    let client_id = remote_client_id(request.extensions());
    let db = target_database(&headers);

    let engine = state.engine.clone();
    let cancel = tokio_util::sync::CancellationToken::new();
    let engine_tx = tokio::task::spawn_blocking(move || engine.begin(&cancel, &db))
        .await
        .map_err(|e| ApiError::Internal(format!("begin task failed: {e}")))??;

    let handle = state.transactions.begin(&client_id, engine_tx)?;
    Ok(Json(BeginResponse { tx: handle.id.clone(), isolation: "snapshot" }))
}

#[derive(Deserialize)]
pub struct ExecRequest {
    pub sql: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

#[derive(Serialize)]
pub struct ExecResponse {
    pub affected_rows: u64,
    pub returning: Option<QueryResult>,
    pub latency_ms: u64,
}

pub async fn exec(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<ExecRequest>,
) -> ApiResult<Json<ExecResponse>> {
    state.record_request();
    let start = Instant::now();

    if body.sql.trim().is_empty() {
        return Err(ApiError::BadRequest("sql must not be empty".to_string()));
    }

    let handle = state.transactions.get(&id)?;
    state.transactions.touch(&id);

    let engine = state.engine.clone();
    let sql = body.sql.clone();
    let args = body.args.clone();
    let cancel = handle.cancel.clone();
    let handle_for_task = handle.clone();
    let result = tokio::task::spawn_blocking(move || engine.execute_in_tx(&cancel, &handle_for_task.engine_tx, &sql, &args))
        .await
        .map_err(|e| ApiError::Internal(format!("exec task failed: {e}")))??;

    Ok(Json(ExecResponse {
        affected_rows: result.affected_rows,
        returning: result.returning,
        latency_ms: latency_ms(start),
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// REDESIGN FLAG (a): commit on the engine *before* removing the handle.
/// A failed commit leaves the transaction registered and surfaces the
/// engine's error instead of silently succeeding.
pub async fn commit(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<StatusResponse>> {
    state.record_request();
    let handle = state.transactions.get(&id)?;

    let engine = state.engine.clone();
    let cancel = handle.cancel.clone();
    let handle_for_task = handle.clone();
    tokio::task::spawn_blocking(move || engine.commit(&cancel, &handle_for_task.engine_tx))
        .await
        .map_err(|e| ApiError::Internal(format!("commit task failed: {e}")))??;

    state.transactions.remove(&id);
    Ok(Json(StatusResponse { status: "committed" }))
}

pub async fn rollback(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<StatusResponse>> {
    state.record_request();
    let handle = state.transactions.get(&id)?;

    let engine = state.engine.clone();
    let cancel = handle.cancel.clone();
    let handle_for_task = handle.clone();
    tokio::task::spawn_blocking(move || engine.rollback(&cancel, &handle_for_task.engine_tx))
        .await
        .map_err(|e| ApiError::Internal(format!("rollback task failed: {e}")))??;

    state.transactions.remove(&id);
    Ok(Json(StatusResponse { status: "rolled_back" }))
}
