//! spec.md §8 scenarios 2 ("Transaction happy path") and 3 ("Transaction
//! quota").

mod common;

use common::{json_request, json_response, server_without_auth, TestServer};
use tower::ServiceExt;

async fn seed_users_table(server: &TestServer) {
    let resp = server
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/execute",
            Some("testdb"),
            serde_json::json!({"sql": "CREATE TABLE users(id INT PRIMARY KEY, name TEXT)"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let resp = server
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/execute",
            Some("testdb"),
            serde_json::json!({"sql": "INSERT INTO users(id,name) VALUES(1,'Alice')"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn begin_exec_commit_then_commit_again_is_not_found() {
    let server = server_without_auth();
    seed_users_table(&server).await;

    let resp = server
        .router
        .clone()
        .oneshot(json_request("POST", "/tx/begin", Some("testdb"), serde_json::json!({})))
        .await
        .unwrap();
    let (status, body) = json_response(resp).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["isolation"], "snapshot");
    let tx = body["tx"].as_str().unwrap().to_string();

    let resp = server
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tx/{tx}/exec"),
            None,
            serde_json::json!({"sql": "UPDATE users SET name='Bob' WHERE id=1"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let resp = server
        .router
        .clone()
        .oneshot(json_request("POST", &format!("/tx/{tx}/commit"), None, serde_json::json!({})))
        .await
        .unwrap();
    let (status, body) = json_response(resp).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["status"], "committed");

    let resp = server
        .router
        .clone()
        .oneshot(json_request("POST", &format!("/tx/{tx}/commit"), None, serde_json::json!({})))
        .await
        .unwrap();
    let (status, body) = json_response(resp).await;
    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn third_begin_from_same_client_is_rejected() {
    let server = server_without_auth(); // max_tx_per_client = 2

    let first = server
        .router
        .clone()
        .oneshot(json_request("POST", "/tx/begin", Some("testdb"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(first.status(), axum::http::StatusCode::OK);

    let second = server
        .router
        .clone()
        .oneshot(json_request("POST", "/tx/begin", Some("testdb"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(second.status(), axum::http::StatusCode::OK);

    let third = server
        .router
        .clone()
        .oneshot(json_request("POST", "/tx/begin", Some("testdb"), serde_json::json!({})))
        .await
        .unwrap();
    let (status, body) = json_response(third).await;
    assert_eq!(status, axum::http::StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "TOO_MANY_TRANSACTIONS");
}
