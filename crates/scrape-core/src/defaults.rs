//! Centralized default constants for the scrape job coordinator.
//!
//! **This module is the single source of truth** for shared default values.
//! Every tunable here is also overridable through configuration; none of
//! them is a hidden constant.

// =============================================================================
// JOB LIFECYCLE
// =============================================================================

/// Default maximum number of claims a job may receive before it is failed.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Default staleness window in seconds. A claim older than this may be
/// taken over by another worker.
pub const JOB_STALE_AFTER_SECS: u64 = 300;

// =============================================================================
// WORKER
// =============================================================================

/// Default seconds between poll cycles.
pub const JOB_POLL_INTERVAL_SECS: u64 = 5;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 3;

/// Default per-job extraction timeout in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 30;

/// Upper bound for the poll backoff after store errors, in seconds.
pub const JOB_MAX_POLL_BACKOFF_SECS: u64 = 60;

/// How long shutdown waits for in-flight jobs before abandoning them, in seconds.
pub const JOB_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Candidates fetched per poll, as a multiple of the free concurrency budget.
/// Over-fetching lets a worker fill its budget when it loses some races.
pub const CLAIM_CANDIDATE_FACTOR: usize = 2;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// EXTRACTION
// =============================================================================

/// Maximum page body size accepted by the HTTP extractor (10 MB).
pub const MAX_PAGE_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Default User-Agent for outbound fetches.
pub const USER_AGENT: &str = "Autonomous-Scraper-Bot/1.0";

/// Maximum characters of extracted text stored per job.
pub const MAX_TEXT_CHARS: usize = 100_000;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for job listings.
pub const PAGE_SIZE: i64 = 100;

/// Largest page size a caller may request.
pub const PAGE_SIZE_MAX: i64 = 1000;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;

/// Window used for the "recent jobs" statistic, in hours.
pub const STATS_RECENT_HOURS: i64 = 24;
