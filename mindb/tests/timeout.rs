//! spec.md §8 scenario 4 ("Statement timeout").

mod common;

use common::{json_request, json_response, server_without_auth};
use tower::ServiceExt;

#[tokio::test]
async fn long_running_query_with_tight_deadline_times_out() {
    let server = server_without_auth();

    let long_sql = "WITH RECURSIVE cnt(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM cnt WHERE x < 50000000) \
                     SELECT count(*) FROM cnt";
    let resp = server
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/query",
            Some("testdb"),
            serde_json::json!({"sql": long_sql, "timeout_ms": 1}),
        ))
        .await
        .unwrap();

    let (status, body) = json_response(resp).await;
    assert_eq!(status, axum::http::StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["error"]["code"], "TIMEOUT");
}
