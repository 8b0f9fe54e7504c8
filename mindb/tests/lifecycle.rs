//! spec.md §8 scenario 1 ("Lifecycle").

mod common;

use common::{json_request, json_response, server_without_auth};
use tower::ServiceExt;

#[tokio::test]
async fn create_insert_select_round_trip() {
    let server = server_without_auth();

    let resp = server
        .router
        .clone()
        .oneshot(json_request("POST", "/execute", None, serde_json::json!({"sql": "CREATE DATABASE testdb"})))
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
    let (status, body) = json_response(resp).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["affected_rows"], 1);

    let resp = server
        .router
        .clone()
        .oneshot(json_request("POST", "/query", Some("testdb"), serde_json::json!({"sql": "SELECT * FROM users"})))
        .await
        .unwrap();
    let (status, body) = json_response(resp).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["columns"], serde_json::json!(["id", "name"]));
    assert_eq!(body["rows"], serde_json::json!([["1", "Alice"]]));
    assert_eq!(body["row_count"], 1);
    assert_eq!(body["truncated"], false);
}
