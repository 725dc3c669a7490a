//! In-memory job repository.
//!
//! Applies the same [`scrape_core::lifecycle`] transitions as the PostgreSQL
//! store, each one under a single write lock, so it honors the same claim
//! exclusivity. Used by tests and by `JOB_STORE=memory` deployments that do
//! not need durability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use scrape_core::lifecycle::{self, Transition};
use scrape_core::{
    defaults, validate_job_url, Error, Job, JobRepository, JobStatus, ListJobsRequest,
    QueueStats, Result, ScrapeOptions, ScrapeResult,
};

/// Volatile [`JobRepository`] backed by a map.
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
    max_attempts: i32,
    notify: Arc<Notify>,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::with_max_attempts(defaults::JOB_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: i32) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Get the notification handle for event-driven worker wake.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, url: &str, options: ScrapeOptions) -> Result<Job> {
        let url = validate_job_url(url)?;
        let job = Job::new_pending(url, options, self.max_attempts, Utc::now());

        self.jobs.write().await.insert(job.id, job.clone());
        self.notify.notify_waiters();
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn list(&self, request: ListJobsRequest) -> Result<Vec<Job>> {
        let request = request.normalized();
        let jobs = self.jobs.read().await;

        let mut matching: Vec<&Job> = jobs
            .values()
            .filter(|job| request.status.map_or(true, |s| job.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(matching
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.page_size as usize)
            .cloned()
            .collect())
    }

    async fn list_claimable(&self, stale_after: Duration, limit: i64) -> Result<Vec<Job>> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;

        let mut claimable: Vec<&Job> = jobs
            .values()
            .filter(|job| lifecycle::is_claimable(job, stale_after, now))
            .collect();
        claimable.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(claimable
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        stale_after: Duration,
    ) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;

        match lifecycle::claim(job, worker_id, stale_after, Utc::now())? {
            Transition::Abandoned => {
                warn!(
                    subsystem = "store",
                    component = "jobs",
                    op = "abandon",
                    job_id = %job_id,
                    attempts = job.attempts,
                    "Stale job exhausted its attempts, marked failed"
                );
                Err(Error::ClaimFailed(job_id))
            }
            transition => {
                debug!(
                    subsystem = "store",
                    component = "jobs",
                    op = "claim",
                    job_id = %job_id,
                    worker_id,
                    attempt = job.attempts,
                    reclaimed = transition == Transition::Reclaimed,
                    "Job claimed"
                );
                Ok(job.clone())
            }
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: ScrapeResult,
    ) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;

        lifecycle::complete(job, worker_id, result, Utc::now())?;
        Ok(job.clone())
    }

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;

        if lifecycle::fail(job, worker_id, error, Utc::now())? == Transition::Retried {
            self.notify.notify_waiters();
        }
        Ok(job.clone())
    }

    async fn delete(&self, job_id: Uuid) -> Result<()> {
        self.jobs
            .write()
            .await
            .remove(&job_id)
            .map(|_| ())
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let since = Utc::now() - chrono::Duration::hours(defaults::STATS_RECENT_HOURS);
        let jobs = self.jobs.read().await;

        let mut stats = QueueStats {
            total: jobs.len() as i64,
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::InProgress => stats.in_progress += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            if job.created_at >= since {
                stats.recent_24h += 1;
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
