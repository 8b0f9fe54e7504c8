//! Security headers, access logging, and panic recovery — steps 2–4 of
//! spec.md §4.6.

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::time::Duration;

/// Request extension marking whether the connection arrived over TLS.
/// Set by the listener loop in `server.rs` before the request reaches
/// the router; consumed here and by the HTTPS-redirect layer.
#[derive(Clone, Copy)]
pub struct ConnectionIsTls(pub bool);

/// Step 4: sets the fixed security-header set, then HSTS when (and only
/// when) the connection arrived over TLS. Existing headers from deeper
/// layers are preserved — this only ever inserts headers the handler
/// itself never sets.
pub async fn set_security_headers(request: Request, next: axum::middleware::Next) -> Response {
    let is_tls = request.extensions().get::<ConnectionIsTls>().map(|v| v.0).unwrap_or(false);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("strict-origin-when-cross-origin"));
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    if is_tls {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }
    response
}

/// Step 3: `TraceLayer`'s `on_response` hook. Level is chosen from the
/// status code per spec.md §4.6 (`info` <400, `warn` 4xx, `error` 5xx);
/// `tower_http::trace` already captured method/path/latency in the span.
pub fn access_log_on_response<B>(response: &Response<B>, latency: Duration, _span: &tracing::Span) {
    let status = response.status();
    let bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    if status.is_server_error() {
        tracing::error!(%status, bytes, latency_ms = latency.as_millis() as u64, "request completed");
    } else if status.is_client_error() {
        tracing::warn!(%status, bytes, latency_ms = latency.as_millis() as u64, "request completed");
    } else {
        tracing::info!(%status, bytes, latency_ms = latency.as_millis() as u64, "request completed");
    }
}

/// Step 2: recovers any panic below this layer. Logs the recovered value
/// and a best-effort message, then answers 500 — never rethrows.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "recovered from panic in request handler");

    let body = serde_json::json!({"error": {"code": "INTERNAL_ERROR", "message": "internal error"}});
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
}
