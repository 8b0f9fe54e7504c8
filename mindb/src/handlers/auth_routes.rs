//! `/auth/logout` and `/auth/refresh` — spec.md §4.7 "Auth endpoints".

use super::{session_cookie, set_cookie_header};
use crate::error::{ApiError, ApiResult};
use crate::pipeline::security::ConnectionIsTls;
use crate::pipeline::SharedState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub async fn logout(State(state): State<SharedState>, request: Request) -> ApiResult<Response> {
    state.record_request();
    let is_tls = request.extensions().get::<ConnectionIsTls>().map(|v| v.0).unwrap_or(false);

    if let Some(token) = session_cookie(request.headers()) {
        state.sessions.revoke(&token);
    }

    let body = serde_json::json!({"status": "logged_out"});
    let mut response = (axum::http::StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(header::SET_COOKIE, set_cookie_header("", -1, is_tls));
    Ok(response)
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub status: &'static str,
    pub expires_in: u64,
}

pub async fn refresh(State(state): State<SharedState>, request: Request) -> ApiResult<Response> {
    state.record_request();
    let is_tls = request.extensions().get::<ConnectionIsTls>().map(|v| v.0).unwrap_or(false);

    let token = session_cookie(request.headers()).ok_or(ApiError::Unauthorized)?;
    let new_token = state.sessions.refresh(&token)?;

    let expires_in = state.sessions.session_timeout().as_secs();
    let mut response = (axum::http::StatusCode::OK, Json(RefreshResponse { status: "session_refreshed", expires_in })).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, set_cookie_header(&new_token, expires_in as i64, is_tls));
    Ok(response)
}
