//! `mindb_core` — embedded single-writer SQL engine with an HTTP(S) front
//! end. Module layout mirrors the component breakdown: `config` (C1),
//! `lock` (C2), `engine` (C3), `gate` (C4), `txn` (C5), `auth` (C6),
//! `pipeline` (C7), `handlers` (C8), `server` (C9).

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod lock;
pub mod pipeline;
pub mod server;
pub mod txn;

pub use config::{Cli, Config};

/// Entry point used by the `mindb` binary and by integration tests:
/// builds the stack described by `config` and serves until it receives a
/// shutdown signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    server::run(config).await
}
