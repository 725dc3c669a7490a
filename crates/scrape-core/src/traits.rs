//! Repository traits for the job store.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Job, ListJobsRequest, QueueStats, ScrapeOptions, ScrapeResult};

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Durable store of scrape jobs and the single source of truth for their state.
///
/// Every mutating method is one atomic conditional update: implementations
/// must never read a job, decide, and then write it back unguarded.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a pending job for `url`. Fails with `InvalidInput` when the URL
    /// is not an absolute http(s) URL.
    async fn create(&self, url: &str, options: ScrapeOptions) -> Result<Job>;

    /// Fetch a job by id. Fails with `JobNotFound` if absent.
    async fn get(&self, job_id: Uuid) -> Result<Job>;

    /// List jobs newest-first by `created_at` (ties broken by id).
    async fn list(&self, request: ListJobsRequest) -> Result<Vec<Job>>;

    /// Pending jobs plus in-progress jobs whose claim is older than
    /// `stale_after`, oldest first. Candidates only: a worker must still win
    /// `try_claim` for each.
    async fn list_claimable(&self, stale_after: Duration, limit: i64) -> Result<Vec<Job>>;

    /// Atomically claim a pending or stale job for `worker_id`.
    ///
    /// On success the job is `in_progress`, owned by `worker_id`, with
    /// `claimed_at = now` and `attempts` incremented. Fails with
    /// `ClaimFailed` when another worker holds a live claim or the attempts
    /// of a stale job are exhausted (in which case it is failed), with
    /// `StaleClaim` when the job is already terminal, and with `JobNotFound`
    /// when it does not exist.
    async fn try_claim(&self, job_id: Uuid, worker_id: &str, stale_after: Duration)
        -> Result<Job>;

    /// Mark a job completed. Fails with `StaleClaim` unless `worker_id` still
    /// owns it, and with `JobNotFound` if it was deleted.
    async fn complete(&self, job_id: Uuid, worker_id: &str, result: ScrapeResult)
        -> Result<Job>;

    /// Record a failed attempt: back to `pending` while attempts remain,
    /// otherwise `failed`. Same ownership guard as [`JobRepository::complete`].
    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<Job>;

    /// Remove a job unconditionally. Fails with `JobNotFound` if absent.
    async fn delete(&self, job_id: Uuid) -> Result<()>;

    /// Job counts by status.
    async fn stats(&self) -> Result<QueueStats>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<()>;
}
