//! CLI entry point. Parses flags/environment into a `Config`, wires up
//! structured logging, and hands off to `mindb_core::run`.

use clap::Parser;
use mindb_core::{Cli, Config};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    init_logging(&config.log_level);
    install_panic_hook();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(mindb_core::run(config))
}

/// `RUST_LOG` overrides the `--log-level`/`MINDB_LOG_LEVEL` flag when set,
/// matching the usual `tracing-subscriber` convention.
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

/// Panics inside request handlers are already caught by the pipeline's
/// `CatchPanicLayer`; this hook covers everything else (background tasks,
/// startup code) by routing the payload through `tracing` instead of
/// letting it go to stderr unstructured.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        tracing::error!(location = %location, payload = %payload, "panic");
    }));
}
