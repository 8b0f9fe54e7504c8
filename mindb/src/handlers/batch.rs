//! `POST /query/batch` — spec.md §4.7. Each query gets its own
//! deadline-bounded context; the response is 200 even when individual
//! queries fail (§7 "the one exception").

use super::{run_with_deadline, target_database};
use crate::error::{ApiError, ApiResult};
use crate::pipeline::SharedState;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
pub struct BatchRequest {
    pub queries: Vec<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Success { result: &'static str },
    Failure { error: String },
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchOutcome>,
    pub total_time_ms: u64,
}

pub async fn batch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Extension(request_cancel): Extension<CancellationToken>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    state.record_request();
    let start = Instant::now();

    if body.queries.is_empty() {
        return Err(ApiError::BadRequest("queries must not be empty".to_string()));
    }

    let db = target_database(&headers);
    let mut results = Vec::with_capacity(body.queries.len());

    for sql in body.queries {
        // Each query gets its own child so one query's deadline-trip
        // doesn't cancel the rest of the batch; a client disconnect on
        // `request_cancel` still reaches every child.
        let cancel = request_cancel.child_token();
        let _permit = state.gate.acquire(&cancel).await?;
        let cancel_for_task = cancel.clone();
        let engine = state.engine.clone();
        let db = db.clone();

        let outcome = run_with_deadline(state.config.statement_timeout, cancel, move || {
            engine.execute(&cancel_for_task, &db, &sql, &[])
        })
        .await;

        results.push(match outcome {
            Ok(_) => BatchOutcome::Success { result: "success" },
            Err(e) => BatchOutcome::Failure { error: e.to_string() },
        });
    }

    Ok(Json(BatchResponse { results, total_time_ms: start.elapsed().as_millis() as u64 }))
}
