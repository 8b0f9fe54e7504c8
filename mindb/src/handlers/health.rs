//! `GET /health` — spec.md §4.7. Always 200; never touches the engine.

use crate::error::ApiResult;
use crate::pipeline::SharedState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub open_transactions: usize,
    pub available_exec_slots: usize,
}

pub async fn health(State(state): State<SharedState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        open_transactions: state.transactions.stats().total,
        available_exec_slots: state.gate.available(),
    }))
}
