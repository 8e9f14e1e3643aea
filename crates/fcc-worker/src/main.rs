//! Forbidden content checker worker.
//!
//! Usage:
//!     fcc-worker [--once] [--worker-id ID] [--database PATH]

mod worker;

use anyhow::Context;
use clap::Parser;
use fcc_core::AppConfig;
use fcc_db::Database;
use fcc_scanner::ScanOrchestrator;
use std::path::PathBuf;
use std::time::Duration;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "fcc-worker", about = "Processes queued forbidden content scan jobs")]
struct Args {
    /// Process at most one job, then exit
    #[arg(long)]
    once: bool,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "FCC_WORKER_ID")]
    worker_id: Option<String>,

    /// Database file, overriding the configuration
    #[arg(long)]
    database: Option<PathBuf>,
}

/// Initialize tracing subscriber for logging.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fcc=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = AppConfig::load_with_env().context("loading configuration")?;
    if let Some(path) = args.database {
        config.database.path = Some(path);
    }

    let db_path = config.database_path()?;
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }
    let db = Database::with_max_connections(&db_path, config.database.max_connections)
        .await
        .with_context(|| format!("opening database {}", db_path.display()))?;
    db.run_migrations().await.context("running migrations")?;

    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple()));

    tracing::info!("Starting fcc-worker v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Database: {}", db_path.display());
    tracing::info!("  Worker ID: {}", worker_id);

    let orchestrator = ScanOrchestrator::from_config(db.pool().clone(), &config)?;
    let worker = Worker::new(
        orchestrator,
        worker_id,
        Duration::from_secs(config.queue.poll_interval_secs.max(1)),
    );

    let result = worker.run(args.once).await;
    db.close().await;
    result
}
