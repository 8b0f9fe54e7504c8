//! spec.md §8 scenario 6 ("Streaming cancellation").

mod common;

use axum::body::Body;
use bytes::Bytes;
use common::{json_request, server_without_auth};
use futures::StreamExt;
use tower::ServiceExt;

#[tokio::test]
async fn dropping_the_response_after_three_chunks_stops_at_the_flush_boundary() {
    let server = server_without_auth();

    let resp = server
        .router
        .clone()
        .oneshot(json_request("POST", "/execute", Some("testdb"), serde_json::json!({"sql": "CREATE TABLE large_table(n INT)"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    for start in (0..500).step_by(100) {
        let values: Vec<String> = (start..start + 100).map(|n| format!("({n})")).collect();
        let sql = format!("INSERT INTO large_table(n) VALUES {}", values.join(","));
        let resp = server
            .router
            .clone()
            .oneshot(json_request("POST", "/execute", Some("testdb"), serde_json::json!({"sql": sql})))
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/stream?sql=SELECT+*+FROM+large_table&limit=100000")
        .header("X-Mindb-Database", "testdb")
        .body(Body::empty())
        .unwrap();
    let resp = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/x-ndjson");

    let mut stream = resp.into_body().into_data_stream();
    let mut emitted_rows = 0usize;
    for _ in 0..3 {
        let chunk: Bytes = stream.next().await.unwrap().unwrap();
        emitted_rows += chunk.iter().filter(|&&b| b == b'\n').count();
    }
    assert_eq!(emitted_rows, 300); // three 100-row flush boundaries, of 500 available

    // Simulates the client closing the connection mid-stream: axum/hyper
    // would drop the response body here, which is what triggers the
    // `stream_cancelled` log in the handler's `Drop` impl.
    drop(stream);
}
