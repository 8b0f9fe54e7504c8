//! spec.md §8 scenario 5 ("Session flow").

mod common;

use axum::http::header;
use base64::Engine as _;
use common::server_with_auth;
use tower::ServiceExt;

fn basic_auth_header(user: &str, pass: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
    format!("Basic {encoded}")
}

fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn login_cookie_logout_then_revoked_cookie_is_rejected() {
    let server = server_with_auth("hunter2");

    let login = axum::http::Request::builder()
        .method("GET")
        .uri("/health")
        .header(header::AUTHORIZATION, basic_auth_header("root", "hunter2"))
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = server.router.clone().oneshot(login).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let set_cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(set_cookie.contains("mindb_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    let cookie = cookie_pair(&set_cookie);

    let with_cookie = axum::http::Request::builder()
        .method("GET")
        .uri("/health")
        .header(header::COOKIE, cookie.clone())
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = server.router.clone().oneshot(with_cookie).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let logout = axum::http::Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header(header::COOKIE, cookie.clone())
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = server.router.clone().oneshot(logout).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let stale = axum::http::Request::builder()
        .method("GET")
        .uri("/health")
        .header(header::COOKIE, cookie)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = server.router.clone().oneshot(stale).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
}
