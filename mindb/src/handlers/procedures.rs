//! Stored procedure endpoints — spec.md §4.7 "Stored procedures".

use crate::engine::ProcParam;
use crate::error::ApiResult;
use crate::pipeline::SharedState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub wasm_base64: String,
    pub params: Option<Vec<ProcParam>>,
    pub return_type: Option<String>,
}

#[derive(Serialize)]
pub struct ProcedureEnvelope {
    pub name: String,
    pub message: &'static str,
    pub latency_ms: u64,
}

pub async fn create(
    State(state): State<SharedState>,
    Extension(cancel): Extension<CancellationToken>,
    Json(body): Json<CreateRequest>,
) -> ApiResult<(StatusCode, Json<ProcedureEnvelope>)> {
    state.record_request();
    let start = Instant::now();
    state
        .engine
        .create_procedure(&cancel, &body.name, &body.wasm_base64, body.params, body.return_type)?;
    Ok((
        StatusCode::CREATED,
        Json(ProcedureEnvelope { name: body.name, message: "procedure created", latency_ms: start.elapsed().as_millis() as u64 }),
    ))
}

pub async fn drop(
    State(state): State<SharedState>,
    Extension(cancel): Extension<CancellationToken>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProcedureEnvelope>> {
    state.record_request();
    let start = Instant::now();
    state.engine.drop_procedure(&cancel, &name)?;
    Ok(Json(ProcedureEnvelope { name, message: "procedure dropped", latency_ms: start.elapsed().as_millis() as u64 }))
}

#[derive(Serialize)]
pub struct ListResponse {
    pub procedures: Vec<crate::engine::ProcedureInfo>,
    pub count: usize,
    pub latency_ms: u64,
}

pub async fn list(
    State(state): State<SharedState>,
    Extension(cancel): Extension<CancellationToken>,
) -> ApiResult<Json<ListResponse>> {
    state.record_request();
    let start = Instant::now();
    let procedures = state.engine.list_procedures(&cancel)?;
    Ok(Json(ListResponse { count: procedures.len(), procedures, latency_ms: start.elapsed().as_millis() as u64 }))
}

#[derive(Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

#[derive(Serialize)]
pub struct CallResponse {
    pub result: JsonValue,
    pub latency_ms: u64,
}

/// "engine errors (including `not found`) map to 500/`INTERNAL_ERROR`
/// (the adapter is the source of truth — not-found is diagnosed one
/// level below this layer)" — spec.md §4.7.
pub async fn call(
    State(state): State<SharedState>,
    Extension(cancel): Extension<CancellationToken>,
    Path(name): Path<String>,
    Json(body): Json<CallRequest>,
) -> ApiResult<Json<CallResponse>> {
    state.record_request();
    let start = Instant::now();
    let result = state
        .engine
        .call_procedure(&cancel, &name, &body.args)
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    Ok(Json(CallResponse { result, latency_ms: start.elapsed().as_millis() as u64 }))
}
