//! C9: lifecycle sequencer. Brings the stack up in the order spec.md
//! §4.8 describes — configure, lock, engine, registries, gate, pipeline,
//! listeners — then serves until a shutdown signal arrives and tears the
//! same stack down in reverse, bounded by `shutdown_grace`.

use crate::auth::{self, SessionStore, UserStore};
use crate::config::Config;
use crate::engine::sqlite::SqliteEngine;
use crate::engine::EngineAdapter;
use crate::gate::ExecutionGate;
use crate::lock::ProcessLock;
use crate::pipeline::{self, AppState, SharedState};
use crate::txn::TransactionRegistry;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Runs the server to completion: start up, serve, and shut down again.
/// Returns once shutdown has finished (normally, on SIGINT/SIGTERM).
pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    tracing::info!(data_dir = %config.data_dir, "acquiring process lock");
    let lock = ProcessLock::acquire(&config.data_dir)?;

    let (engine, users) = match open_engine_and_users(&config) {
        Ok(pair) => pair,
        Err(e) => {
            lock.release();
            return Err(e);
        }
    };

    let sessions = SessionStore::new(config.session_signing_key.clone(), config.session_timeout);
    let sweep_interval = (config.session_timeout / 2).max(Duration::from_secs(30));
    let session_sweeper = auth::spawn_session_sweeper(sessions.clone(), sweep_interval);

    let transactions = TransactionRegistry::new(config.max_open_tx, config.max_tx_per_client, config.tx_idle_timeout);
    let gate = Arc::new(ExecutionGate::new(config.exec_concurrency));

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        engine: engine.clone(),
        gate,
        transactions: transactions.clone(),
        sessions,
        users,
        started_at: Instant::now(),
        requests_total: AtomicU64::new(0),
    });

    let handle = Handle::new();
    let listeners = match start_listeners(&config, &state, &handle).await {
        Ok(listeners) => listeners,
        Err(e) => {
            session_sweeper.abort();
            transactions.close();
            lock.release();
            return Err(e);
        }
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");
    handle.graceful_shutdown(Some(config.shutdown_grace));

    for listener in listeners {
        let _ = listener.await;
    }

    session_sweeper.abort();
    transactions.close();
    if let Err(e) = engine.flush() {
        tracing::warn!(error = %e, "engine flush failed during shutdown");
    }
    lock.release();
    tracing::info!("shutdown complete");
    Ok(())
}

fn open_engine_and_users(config: &Config) -> anyhow::Result<(Arc<EngineAdapter>, Arc<UserStore>)> {
    tracing::info!("opening engine");
    let engine = SqliteEngine::open(&config.data_dir)?;
    let engine = Arc::new(EngineAdapter::new(Box::new(engine)));

    tracing::info!("loading user store");
    let users = Arc::new(UserStore::load(&config.data_dir)?);

    Ok((engine, users))
}

/// Starts the main listener (TLS or plain HTTP, per configuration) plus,
/// when TLS and the redirect toggle are both on, a second plain-HTTP
/// listener whose only job is to hand the request to the pipeline's own
/// `https_redirect` middleware (spec.md §4.6 step 6, §4.8 "second
/// listener for HTTPS redirect").
async fn start_listeners(config: &Config, state: &SharedState, handle: &Handle) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut listeners = Vec::new();

    if config.tls_enabled {
        let cert = config
            .tls_cert
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("tls_enabled without tls_cert"))?;
        let key = config
            .tls_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("tls_enabled without tls_key"))?;
        let tls_config = RustlsConfig::from_pem_file(cert.as_std_path(), key.as_std_path()).await?;

        tracing::info!(addr = %config.listen_addr, "starting TLS listener");
        let app = pipeline::build_router(state.clone(), true).into_make_service_with_connect_info::<SocketAddr>();
        let server_handle = handle.clone();
        let addr = config.listen_addr;
        listeners.push(tokio::spawn(async move {
            if let Err(e) = axum_server::bind_rustls(addr, tls_config).handle(server_handle).serve(app).await {
                tracing::error!(error = %e, "TLS listener exited with error");
            }
        }));

        if config.https_redirect {
            let redirect_addr = SocketAddr::new(config.listen_addr.ip(), config.https_redirect_port);
            tracing::info!(addr = %redirect_addr, "starting HTTPS-redirect listener");
            let app = pipeline::build_router(state.clone(), false).into_make_service_with_connect_info::<SocketAddr>();
            let server_handle = handle.clone();
            listeners.push(tokio::spawn(async move {
                if let Err(e) = axum_server::bind(redirect_addr).handle(server_handle).serve(app).await {
                    tracing::error!(error = %e, "redirect listener exited with error");
                }
            }));
        }
    } else {
        tracing::info!(addr = %config.listen_addr, "starting plain-HTTP listener");
        let app = pipeline::build_router(state.clone(), false).into_make_service_with_connect_info::<SocketAddr>();
        let server_handle = handle.clone();
        let addr = config.listen_addr;
        listeners.push(tokio::spawn(async move {
            if let Err(e) = axum_server::bind(addr).handle(server_handle).serve(app).await {
                tracing::error!(error = %e, "listener exited with error");
            }
        }));
    }

    Ok(listeners)
}

/// Waits for SIGINT or SIGTERM (spec.md §4.8 "graceful shutdown trigger").
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}
