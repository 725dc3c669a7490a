//! scrape-api server binary.
//!
//! Serves the job API and, unless `JOB_WORKER_ENABLED=false`, runs an
//! embedded worker against the same store.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use scrape_api::{router, AppState};
use scrape_db::{JobStore, StoreConfig};
use scrape_jobs::{logging, shutdown_signal, HttpExtractor, WorkerBuilder, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = logging::init(
        "scrape_api=debug,scrape_jobs=info,scrape_db=info,tower_http=debug",
        "scrape-api.log",
    );

    let worker_config = WorkerConfig::from_env();
    let store_config = StoreConfig::from_env()?.with_max_attempts(worker_config.max_attempts);
    let store = JobStore::open(&store_config).await?;

    let worker = if worker_config.enabled {
        info!(
            worker_id = %worker_config.worker_id,
            max_concurrent = worker_config.max_concurrent_jobs,
            "Starting embedded worker"
        );
        let worker = WorkerBuilder::new(store.repo.clone(), Arc::new(HttpExtractor::new()?))
            .with_config(worker_config)
            .with_notify(store.notify.clone())
            .build();
        Some(worker.start())
    } else {
        info!("Embedded worker disabled (JOB_WORKER_ENABLED=false)");
        None
    };

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let app = router(AppState::new(store.repo.clone(), store.kind.to_string()));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(store = %store.kind, "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    if let Some(handle) = worker {
        handle.shutdown().await?;
        let stats = handle.wait().await?;
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Embedded worker stopped"
        );
    }

    Ok(())
}
