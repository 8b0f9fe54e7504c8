//! C7: request pipeline. Layers are applied outermost-first exactly in
//! spec.md §4.6's numbered order; each is a `tower`/`axum` layer except
//! authentication, which is a dedicated `axum::middleware::from_fn_with_state`
//! since it needs to read and mutate application state (the session
//! store and user store) rather than just the request/response.

pub mod auth;
pub mod cancellation;
pub mod security;

use crate::auth::{SessionStore, UserStore};
use crate::config::Config;
use crate::engine::EngineAdapter;
use crate::txn::TransactionRegistry;
use axum::extract::Request;
use axum::response::Redirect;
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Everything a handler needs, shared behind `Arc` and injected via
/// `axum::extract::State`. Built once by the lifecycle sequencer (C9)
/// and handed to every component by reference — spec.md §9 "no cyclic
/// ownership".
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<EngineAdapter>,
    pub gate: Arc<crate::gate::ExecutionGate>,
    pub transactions: Arc<TransactionRegistry>,
    pub sessions: Arc<SessionStore>,
    pub users: Arc<UserStore>,
    pub started_at: Instant,
    pub requests_total: AtomicU64,
}

impl AppState {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub type SharedState = Arc<AppState>;

/// Assembles the full middleware stack and route table. Layers are added
/// with `Router::layer`, which `tower` applies outside-in in the order
/// given — so the first `.layer()` call here ends up as the **outermost**
/// wrapper, matching §4.6's numbered list (1 outermost .. 7 innermost).
///
/// `is_tls` is fixed per listener (the lifecycle sequencer binds a
/// separate plain-HTTP listener for the redirect case), so it's injected
/// once as a request extension rather than detected at runtime.
pub fn build_router(state: SharedState, is_tls: bool) -> Router {
    let router = crate::handlers::routes(state.clone());

    let router = router
        // 7. authentication — innermost, closest to the handler.
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::session_then_basic))
        // 6. HTTPS redirect.
        .layer(axum::middleware::from_fn_with_state(state.clone(), https_redirect))
        // 5. response compression.
        .layer(CompressionLayer::new().gzip(true).quality(tower_http::CompressionLevel::Precise(5)))
        // 4. security headers.
        .layer(axum::middleware::from_fn(security::set_security_headers))
        // 3. access log (tower-http's trace layer gives us the method/path/
        //    status/latency shape; level selection happens in the span's
        //    `on_response` hook).
        .layer(TraceLayer::new_for_http().on_response(security::access_log_on_response))
        // 2. panic recovery — never let a panic unwind past this layer.
        .layer(CatchPanicLayer::custom(security::panic_response))
        // 1. request-id / real-ip.
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(axum::Extension(security::ConnectionIsTls(is_tls)))
        // 0. per-request cancellation token, outermost so it spans the
        //    whole request lifetime — see `cancellation.rs`.
        .layer(cancellation::RequestCancellationLayer);

    router.with_state(state)
}

/// Step 6 of §4.6: only active when TLS is enabled *and* the redirect
/// toggle is on; answers any non-TLS request with a 301 to the same
/// host+path+query+fragment under `https://`.
async fn https_redirect(
    axum::extract::State(state): axum::extract::State<SharedState>,
    request: Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    if state.config.tls_enabled && state.config.https_redirect {
        let arrived_over_tls = request
            .extensions()
            .get::<security::ConnectionIsTls>()
            .map(|v| v.0)
            .unwrap_or(false);
        if !arrived_over_tls {
            if let Some(host) = request.headers().get(axum::http::header::HOST).and_then(|h| h.to_str().ok()) {
                let path_and_query = request.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/");
                return Redirect::permanent(&format!("https://{host}{path_and_query}")).into_response();
            }
        }
    }
    next.run(request).await
}
