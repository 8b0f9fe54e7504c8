//! Step 7 of spec.md §4.6: session-then-basic authentication. The
//! resolved [`Principal`] is inserted into the request's extensions for
//! handlers to read via `Extension<Principal>`.

use crate::auth::Principal;
use crate::handlers::{session_cookie, set_cookie_header};
use crate::pipeline::security::ConnectionIsTls;
use crate::pipeline::SharedState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()?
    };
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn unauthorized_challenge() -> Response {
    let body = serde_json::json!({"error": {"code": "UNAUTHORIZED", "message": "unauthorized"}});
    let mut response = (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"mindb\""));
    response
}

pub async fn session_then_basic(State(state): State<SharedState>, mut request: Request, next: axum::middleware::Next) -> Response {
    let is_tls = request.extensions().get::<ConnectionIsTls>().map(|v| v.0).unwrap_or(false);
    let client_host = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|addr| addr.0.ip().to_string())
        .unwrap_or_else(|| "%".to_string());

    if state.config.auth_disabled {
        request.extensions_mut().insert(Principal::root());
        return next.run(request).await;
    }

    let cookie = session_cookie(request.headers());
    let mut clear_cookie = false;
    let mut new_cookie: Option<String> = None;

    if let Some(token) = &cookie {
        match state.sessions.validate(token) {
            Ok(validated) => {
                request.extensions_mut().insert(validated.principal);
                return next.run(request).await;
            }
            Err(_) => clear_cookie = true,
        }
    }

    if let Some((user, pass)) = basic_credentials(&request) {
        match state.users.authenticate(&user, &pass, &client_host) {
            Ok(principal) => {
                tracing::info!(username = %principal.username, "login succeeded");
                match state.sessions.create(&principal) {
                    Ok(token) => new_cookie = Some(token),
                    Err(e) => tracing::error!(error = %e, "failed to mint session after successful login"),
                }
                request.extensions_mut().insert(principal);
            }
            Err(e) => {
                let reason = if matches!(e, crate::error::ApiError::AccountLocked) { "account_locked" } else { "invalid_password" };
                tracing::warn!(username = %user, reason, "login failed");
                let mut response = unauthorized_challenge();
                if clear_cookie {
                    response.headers_mut().insert(header::SET_COOKIE, set_cookie_header("", -1, is_tls));
                }
                return response;
            }
        }
    } else if !clear_cookie {
        return unauthorized_challenge();
    } else {
        // Invalid session cookie and no Basic credentials: required mode
        // rejects; the cookie is still cleared below.
        let mut response = unauthorized_challenge();
        response.headers_mut().insert(header::SET_COOKIE, set_cookie_header("", -1, is_tls));
        return response;
    }

    let mut response = next.run(request).await;
    if let Some(token) = new_cookie {
        let max_age = state.sessions.session_timeout().as_secs() as i64;
        response.headers_mut().insert(header::SET_COOKIE, set_cookie_header(&token, max_age, is_tls));
    } else if clear_cookie {
        response.headers_mut().insert(header::SET_COOKIE, set_cookie_header("", -1, is_tls));
    }
    response
}
