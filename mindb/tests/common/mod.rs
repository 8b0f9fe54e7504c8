//! Shared scaffolding for the end-to-end scenarios in spec.md §8. Builds
//! the same stack `server::run` assembles, minus the process lock and
//! the network listener — routes are driven in-process with
//! `tower::ServiceExt::oneshot`.

use camino::Utf8PathBuf;
use mindb_core::auth::{SessionStore, UserStore};
use mindb_core::config::Config;
use mindb_core::engine::sqlite::SqliteEngine;
use mindb_core::engine::EngineAdapter;
use mindb_core::gate::ExecutionGate;
use mindb_core::pipeline::{build_router, AppState, SharedState};
use mindb_core::txn::TransactionRegistry;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct TestServer {
    pub _dir: tempfile::TempDir,
    pub state: SharedState,
    pub router: axum::Router,
}

fn base_config(data_dir: Utf8PathBuf, auth_disabled: bool) -> Config {
    Config {
        data_dir,
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        tls_enabled: false,
        tls_cert: None,
        tls_key: None,
        https_redirect: false,
        https_redirect_port: 80,
        read_timeout: Duration::from_secs(30),
        write_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(120),
        shutdown_grace: Duration::from_secs(5),
        exec_concurrency: 4,
        statement_timeout: Duration::from_millis(500),
        tx_idle_timeout: Duration::from_secs(60),
        max_open_tx: 8,
        max_tx_per_client: 2,
        auth_disabled,
        session_timeout: Duration::from_secs(3600),
        session_signing_key: b"test-signing-key-not-for-prod-0".to_vec(),
        log_level: "debug".to_string(),
        metrics_enabled: true,
    }
}

/// Auth-disabled stack: every request is bound to `root@%` unconditionally
/// (SPEC_FULL.md's "optional mode"), which is what the non-auth scenarios
/// in spec.md §8 (lifecycle, transactions, timeouts, streaming) want.
pub fn server_without_auth() -> TestServer {
    build(true, None)
}

/// Auth-required stack with a password already set on `root@%`, for the
/// session-flow scenario.
pub fn server_with_auth(root_password: &str) -> TestServer {
    build(false, Some(root_password))
}

fn build(auth_disabled: bool, root_password: Option<&str>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let config = Arc::new(base_config(path, auth_disabled));

    let engine = SqliteEngine::open(&config.data_dir).unwrap();
    let engine = Arc::new(EngineAdapter::new(Box::new(engine)));

    let users = UserStore::load(&config.data_dir).unwrap();
    if let Some(password) = root_password {
        users.set_password("root", "%", password).unwrap();
    }
    let users = Arc::new(users);

    let sessions = SessionStore::new(config.session_signing_key.clone(), config.session_timeout);
    let transactions = TransactionRegistry::new(config.max_open_tx, config.max_tx_per_client, config.tx_idle_timeout);
    let gate = Arc::new(ExecutionGate::new(config.exec_concurrency));

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        engine,
        gate,
        transactions,
        sessions,
        users,
        started_at: Instant::now(),
        requests_total: AtomicU64::new(0),
    });

    let router = build_router(state.clone(), false);
    TestServer { _dir: dir, state, router }
}

pub async fn json_response(response: axum::response::Response) -> (axum::http::StatusCode, serde_json::Value) {
    use http_body_util::BodyExt;
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, db: Option<&str>, body: serde_json::Value) -> axum::http::Request<axum::body::Body> {
    let mut builder = axum::http::Request::builder().method(method).uri(uri).header("content-type", "application/json");
    if let Some(db) = db {
        builder = builder.header("X-Mindb-Database", db);
    }
    builder.body(axum::body::Body::from(body.to_string())).unwrap()
}
