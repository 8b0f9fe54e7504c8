//! Single typed error that every component returns, and its mapping onto
//! the HTTP error envelope described in spec.md §4.7/§7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// A category drawn from spec.md §7's taxonomy. Kept small and closed so
/// handlers can match exhaustively when they need to special-case one.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("account is locked")]
    AccountLocked,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many transactions")]
    TooManyTransactions,

    #[error("statement deadline exceeded")]
    Timeout,

    #[error("invalid sql: {0}")]
    InvalidSql(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Gate refused admission (spec.md §6: "503 gate refused"). Distinct
    /// from `Internal` only in status code — both render as
    /// `INTERNAL_ERROR` in the envelope.
    #[error("no execution slots available")]
    GateUnavailable,
}

/// The stable machine-readable codes from spec.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "BAD_REQUEST")]
    BadRequest,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "TOO_MANY_TRANSACTIONS")]
    TooManyTransactions,
    #[serde(rename = "INVALID_SQL")]
    InvalidSql,
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::BadRequest(_) => ErrorCode::BadRequest,
            ApiError::Unauthorized | ApiError::AccountLocked => ErrorCode::Unauthorized,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Conflict(_) => ErrorCode::Conflict,
            ApiError::TooManyTransactions => ErrorCode::TooManyTransactions,
            ApiError::Timeout => ErrorCode::Timeout,
            ApiError::InvalidSql(_) => ErrorCode::InvalidSql,
            ApiError::Internal(_) | ApiError::GateUnavailable => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::AccountLocked => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyTransactions => StatusCode::CONFLICT,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::InvalidSql(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::GateUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The message surfaced to the client. Internal errors get a generic
    /// message; the detail still reaches the access log via `tracing`.
    fn client_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: ErrorCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        } else {
            tracing::debug!(error = %self, "request failed");
        }
        let status = self.status();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.client_message(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::InvalidSql(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
