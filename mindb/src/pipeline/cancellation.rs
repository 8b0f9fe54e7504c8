//! Per-request cancellation. spec.md §5 "Cancellation" requires a client
//! disconnect to unblock `gate.acquire` with a 503 and trip the engine
//! adapter's pre-flight check — but axum/hyper never raise an explicit
//! disconnect event, they express it by dropping the in-flight request's
//! service future. This layer wraps that future: a `CancellationToken` is
//! inserted into the request's extensions for handlers to read, and is
//! cancelled if the future is ever dropped before it resolves.
//!
//! Transactions don't need this — their handle carries its own token,
//! owned by the registry, cancelled by `Close`/idle-sweep (see
//! `handlers/tx.rs`). This is for the one-shot handlers that have no
//! other source of cancellation.

use axum::extract::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

#[derive(Clone, Copy, Default)]
pub struct RequestCancellationLayer;

impl<S> Layer<S> for RequestCancellationLayer {
    type Service = RequestCancellationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestCancellationService { inner }
    }
}

#[derive(Clone)]
pub struct RequestCancellationService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestCancellationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let token = CancellationToken::new();
        request.extensions_mut().insert(token.clone());

        let mut inner = self.inner.clone();
        Box::pin(async move {
            // Armed for as long as this future is being polled. If it's
            // dropped mid-flight (the client went away), `Drop` cancels
            // the token on the way out; a normal return disarms first.
            let mut guard = CancelOnDrop(Some(token));
            let result = inner.call(request).await;
            guard.0.take();
            result
        })
    }
}

/// Cancels the held token when dropped while still armed. `.0.take()`
/// disarms it once the wrapped future has actually resolved.
struct CancelOnDrop(Option<CancellationToken>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }
}
