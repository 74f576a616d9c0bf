//! punchlogd - attendance ledger daemon.
//!
//! The Tokio runtime is built by hand in a synchronous `main` so that
//! argument parsing and configuration errors surface before any worker
//! threads exist.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use punchlog_core::auth::ApiKeyAuthorizer;
use punchlog_core::config::PunchlogConfig;
use punchlog_core::ledger::{LedgerStore, SqliteLedgerStore};
use punchlog_core::time::SystemClock;
use punchlog_daemon::metrics::new_shared_registry;
use punchlog_daemon::{AppState, router};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// punchlogd - hash-chained attendance ledger daemon
#[derive(Parser, Debug)]
#[command(name = "punchlogd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "punchlog.toml")]
    config: PathBuf,

    /// Address to listen on (overrides `daemon.listen_addr`)
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Path to ledger database file (`SQLite`)
    #[arg(long)]
    ledger_db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file path (logs to stdout if not specified)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<PunchlogConfig> {
    let mut config = if args.config.exists() {
        PunchlogConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config from {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "config file not found, using defaults");
        PunchlogConfig::default()
    };

    if let Some(addr) = args.listen_addr {
        config.daemon.listen_addr = addr;
    }
    if let Some(path) = &args.ledger_db {
        config.daemon.ledger_db.clone_from(path);
    }
    Ok(config)
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(&args)?;
    let config = load_config(&args)?;

    let store = SqliteLedgerStore::open(&config.daemon.ledger_db, &config.ledger.store_options())
        .with_context(|| {
            format!(
                "failed to open ledger at {}",
                config.daemon.ledger_db.display()
            )
        })?;
    let stats = store.stats().context("failed to read ledger stats")?;
    info!(
        path = %config.daemon.ledger_db.display(),
        events = stats.event_count,
        "ledger opened"
    );

    let authorizer = ApiKeyAuthorizer::from_env(&config.daemon.api_key_env);
    if !authorizer.is_configured() {
        warn!(
            env = %config.daemon.api_key_env,
            "ingest key variable is unset; POST /api/ingest will return 401"
        );
    }
    if config.subjects.is_empty() {
        warn!("no subjects configured; every scan will be rejected as unknown");
    }

    let metrics = if config.daemon.metrics_enabled {
        Some(new_shared_registry().context("failed to create metrics registry")?)
    } else {
        info!("Metrics disabled");
        None
    };

    let state = AppState::from_config(
        &config,
        Arc::new(store),
        Arc::new(SystemClock),
        authorizer,
        metrics,
    );
    let app = router(state);

    let addr = config.daemon.listen_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;

    info!(addr = %addr, "punchlogd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("punchlogd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("failed to register signal handlers; stopping on ctrl-c only");
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}
