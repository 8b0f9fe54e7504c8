//! C1: configuration loader. Builds an immutable `Config` once at startup;
//! nothing downstream mutates it. See spec.md §3 "Configuration" and
//! SPEC_FULL.md §4.9 for the concrete environment variables.

use camino::Utf8PathBuf;
use clap::Parser;
use rand::RngCore;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI flags mirroring the `MINDB_*` environment variables. Flags take
/// priority over the environment; clap's `env` attribute wires both.
#[derive(Debug, Parser)]
#[command(name = "mindb", about = "Embedded SQL engine with an HTTP front end")]
pub struct Cli {
    #[arg(long, env = "MINDB_DATA_DIR")]
    pub data_dir: Utf8PathBuf,

    #[arg(long, env = "MINDB_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: SocketAddr,

    #[arg(long, env = "MINDB_TLS_ENABLED", default_value_t = false)]
    pub tls_enabled: bool,
    #[arg(long, env = "MINDB_TLS_CERT")]
    pub tls_cert: Option<Utf8PathBuf>,
    #[arg(long, env = "MINDB_TLS_KEY")]
    pub tls_key: Option<Utf8PathBuf>,

    #[arg(long, env = "MINDB_HTTPS_REDIRECT", default_value_t = false)]
    pub https_redirect: bool,
    #[arg(long, env = "MINDB_HTTPS_REDIRECT_PORT", default_value_t = 80)]
    pub https_redirect_port: u16,

    #[arg(long, env = "MINDB_READ_TIMEOUT_S", default_value_t = 30)]
    pub read_timeout_s: u64,
    #[arg(long, env = "MINDB_WRITE_TIMEOUT_S", default_value_t = 30)]
    pub write_timeout_s: u64,
    #[arg(long, env = "MINDB_IDLE_TIMEOUT_S", default_value_t = 120)]
    pub idle_timeout_s: u64,
    #[arg(long, env = "MINDB_SHUTDOWN_GRACE_S", default_value_t = 30)]
    pub shutdown_grace_s: u64,

    #[arg(long, env = "MINDB_EXEC_CONCURRENCY", default_value_t = 64)]
    pub exec_concurrency: usize,
    #[arg(long, env = "MINDB_STATEMENT_TIMEOUT_MS", default_value_t = 30_000)]
    pub statement_timeout_ms: u64,

    #[arg(long, env = "MINDB_TX_IDLE_TIMEOUT_S", default_value_t = 60)]
    pub tx_idle_timeout_s: u64,
    #[arg(long, env = "MINDB_MAX_OPEN_TX", default_value_t = 1000)]
    pub max_open_tx: usize,
    #[arg(long, env = "MINDB_MAX_TX_PER_CLIENT", default_value_t = 10)]
    pub max_tx_per_client: usize,

    #[arg(long, env = "MINDB_AUTH_DISABLED", default_value_t = false)]
    pub auth_disabled: bool,
    #[arg(long, env = "MINDB_SESSION_TIMEOUT_S", default_value_t = 3600)]
    pub session_timeout_s: u64,
    #[arg(long, env = "MINDB_SESSION_SIGNING_KEY")]
    pub session_signing_key: Option<String>,

    #[arg(long, env = "MINDB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    #[arg(long, env = "MINDB_METRICS_ENABLED", default_value_t = false)]
    pub metrics_enabled: bool,
}

/// Lockout window from SPEC_FULL.md §3: fixed, not user-configurable.
pub const LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const LOCKOUT_THRESHOLD: u32 = 5;

/// Immutable configuration record. Built once by [`Config::from_cli`] and
/// handed by reference to every component the lifecycle sequencer builds.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: Utf8PathBuf,
    pub listen_addr: SocketAddr,

    pub tls_enabled: bool,
    pub tls_cert: Option<Utf8PathBuf>,
    pub tls_key: Option<Utf8PathBuf>,

    pub https_redirect: bool,
    pub https_redirect_port: u16,

    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_grace: Duration,

    pub exec_concurrency: usize,
    pub statement_timeout: Duration,

    pub tx_idle_timeout: Duration,
    pub max_open_tx: usize,
    pub max_tx_per_client: usize,

    pub auth_disabled: bool,
    pub session_timeout: Duration,
    /// HMAC signing key for session tokens. Randomly generated at startup
    /// when not configured (spec.md §3 "Session signing key").
    pub session_signing_key: Vec<u8>,

    pub log_level: String,
    pub metrics_enabled: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        if cli.data_dir.as_str().is_empty() {
            anyhow::bail!("data directory is required");
        }
        if cli.tls_enabled && (cli.tls_cert.is_none() || cli.tls_key.is_none()) {
            anyhow::bail!("tls_enabled requires both tls_cert and tls_key");
        }

        let session_signing_key = match cli.session_signing_key {
            Some(ref s) if !s.is_empty() => s.as_bytes().to_vec(),
            _ => {
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                tracing::warn!("no session signing key configured; generated a random one for this process lifetime");
                key
            }
        };

        Ok(Config {
            data_dir: cli.data_dir,
            listen_addr: cli.listen_addr,
            tls_enabled: cli.tls_enabled,
            tls_cert: cli.tls_cert,
            tls_key: cli.tls_key,
            https_redirect: cli.https_redirect,
            https_redirect_port: cli.https_redirect_port,
            read_timeout: Duration::from_secs(cli.read_timeout_s),
            write_timeout: Duration::from_secs(cli.write_timeout_s),
            idle_timeout: Duration::from_secs(cli.idle_timeout_s),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_s),
            exec_concurrency: cli.exec_concurrency.max(1),
            statement_timeout: Duration::from_millis(cli.statement_timeout_ms),
            tx_idle_timeout: Duration::from_secs(cli.tx_idle_timeout_s),
            max_open_tx: cli.max_open_tx,
            max_tx_per_client: cli.max_tx_per_client,
            auth_disabled: cli.auth_disabled,
            session_timeout: Duration::from_secs(cli.session_timeout_s),
            session_signing_key,
            log_level: cli.log_level,
            metrics_enabled: cli.metrics_enabled,
        })
    }

    /// Build directly from values, bypassing clap; used by tests.
    #[cfg(test)]
    pub fn for_test(data_dir: Utf8PathBuf) -> Self {
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
            statement_timeout: Duration::from_millis(5_000),
            tx_idle_timeout: Duration::from_secs(60),
            max_open_tx: 8,
            max_tx_per_client: 2,
            auth_disabled: false,
            session_timeout: Duration::from_secs(3600),
            session_signing_key: b"test-signing-key-not-for-prod-0".to_vec(),
            log_level: "debug".to_string(),
            metrics_enabled: false,
        }
    }
}
