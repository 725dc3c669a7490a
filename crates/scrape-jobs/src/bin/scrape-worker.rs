//! Standalone scrape worker.
//!
//! Polls the configured job store and processes jobs until SIGINT/SIGTERM,
//! then drains in-flight jobs for up to `SHUTDOWN_GRACE` seconds.

use std::sync::Arc;

use tracing::info;

use scrape_db::{JobStore, StoreConfig};
use scrape_jobs::{logging, shutdown_signal, HttpExtractor, WorkerBuilder, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = logging::init(
        "scrape_worker=info,scrape_jobs=info,scrape_db=info",
        "scrape-worker.log",
    );

    let config = WorkerConfig::from_env();
    let store_config = StoreConfig::from_env()?.with_max_attempts(config.max_attempts);
    let store = JobStore::open(&store_config).await?;

    info!(
        worker_id = %config.worker_id,
        store = %store.kind,
        poll_interval_secs = config.poll_interval.as_secs(),
        max_concurrent = config.max_concurrent_jobs,
        default_timeout_secs = config.default_timeout.as_secs(),
        stale_after_secs = config.stale_after.as_secs(),
        max_attempts = config.max_attempts,
        "Starting scrape worker"
    );

    let worker = WorkerBuilder::new(store.repo.clone(), Arc::new(HttpExtractor::new()?))
        .with_config(config)
        .with_notify(store.notify.clone())
        .build();
    let handle = worker.start();

    shutdown_signal().await;
    info!("Shutdown signal received, draining worker");

    handle.shutdown().await?;
    let stats = handle.wait().await?;

    info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Scrape worker stopped"
    );
    Ok(())
}
