//! # scrape-jobs
//!
//! Worker side of the scrape job coordinator.
//!
//! This crate provides:
//! - A polling worker with a bounded concurrency budget
//! - Exponential poll backoff when the store is unreachable
//! - Event broadcast and counters for observing a running worker
//! - The [`Extractor`] trait and the default [`HttpExtractor`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scrape_db::MemoryJobRepository;
//! use scrape_jobs::{HttpExtractor, WorkerBuilder, WorkerConfig};
//!
//! let store = Arc::new(MemoryJobRepository::new());
//! let worker = WorkerBuilder::new(store.clone(), Arc::new(HttpExtractor::new()?))
//!     .with_config(WorkerConfig::from_env())
//!     .with_notify(store.job_notify())
//!     .build();
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! handle.wait().await?;
//! ```

pub mod extractor;
pub mod logging;
pub mod shutdown;
pub mod worker;

// Re-export core types
pub use scrape_core::*;

pub use extractor::{parse_page, ExtractOptions, Extractor, FetchError, HttpExtractor, ParsedPage};
pub use shutdown::shutdown_signal;
pub use worker::{
    poll_delay, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle, WorkerStats,
};
