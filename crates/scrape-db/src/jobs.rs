//! PostgreSQL job repository.
//!
//! Every state change is a single conditional `UPDATE ... RETURNING` whose
//! `WHERE` clause carries the lifecycle guard, so two workers racing for the
//! same row can never both observe success.
//!
//! Timestamps and stale cutoffs come from the database's `now()`, so workers
//! on different hosts agree on when a claim goes stale whatever their own
//! clocks say.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use scrape_core::lifecycle::abandoned_message;
use scrape_core::{
    defaults, validate_job_url, Error, Job, JobRepository, JobStatus, ListJobsRequest,
    QueueStats, Result, ScrapeOptions, ScrapeResult,
};

const JOB_COLUMNS: &str = "id, url, status, options, attempts, max_attempts, claimed_by, \
     claimed_at, result, error, created_at, updated_at, completed_at";

/// Windows longer than this are treated as "never stale" rather than handed
/// to timestamp arithmetic that would leave the representable range.
const MAX_SQL_STALE_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Stale window in microseconds for binding as `$n::bigint`; `None` means
/// no claim is stale.
fn stale_window_micros(stale_after: Duration) -> Option<i64> {
    if stale_after > MAX_SQL_STALE_WINDOW {
        return None;
    }
    i64::try_from(stale_after.as_micros()).ok()
}

/// PostgreSQL implementation of [`JobRepository`].
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Attempt budget stamped on newly created jobs.
    max_attempts: i32,
    /// Woken whenever a job becomes pending so idle workers can poll early.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_max_attempts(pool, defaults::JOB_MAX_ATTEMPTS)
    }

    /// Create a repository that gives new jobs `max_attempts` claims.
    pub fn with_max_attempts(pool: Pool<Postgres>, max_attempts: i32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Get the notification handle for event-driven worker wake.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.try_get("status").map_err(Error::Database)?;
        let options: JsonValue = row.try_get("options").map_err(Error::Database)?;
        let result: Option<JsonValue> = row.try_get("result").map_err(Error::Database)?;

        Ok(Job {
            id: row.try_get("id").map_err(Error::Database)?,
            url: row.try_get("url").map_err(Error::Database)?,
            status: status.parse()?,
            options: serde_json::from_value(options)?,
            attempts: row.try_get("attempts").map_err(Error::Database)?,
            max_attempts: row.try_get("max_attempts").map_err(Error::Database)?,
            claimed_by: row.try_get("claimed_by").map_err(Error::Database)?,
            claimed_at: row.try_get("claimed_at").map_err(Error::Database)?,
            result: result.map(serde_json::from_value).transpose()?,
            error: row.try_get("error").map_err(Error::Database)?,
            created_at: row.try_get("created_at").map_err(Error::Database)?,
            updated_at: row.try_get("updated_at").map_err(Error::Database)?,
            completed_at: row.try_get("completed_at").map_err(Error::Database)?,
        })
    }

    /// Explain why a guarded `complete`/`fail` matched no row.
    async fn ownership_error(&self, job_id: Uuid, worker_id: &str) -> Error {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM scrape_jobs WHERE id = $1)",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await;

        match exists {
            Ok(true) => Error::StaleClaim {
                job_id,
                worker_id: worker_id.to_string(),
            },
            Ok(false) => Error::JobNotFound(job_id),
            Err(e) => Error::Database(e),
        }
    }

    /// Work out why a claim update matched no row. A stale job whose
    /// attempts are used up is failed here; the guard repeats every condition
    /// so a concurrent transition wins over this one.
    async fn claim_rejection(
        &self,
        job_id: Uuid,
        worker_id: &str,
        window_micros: Option<i64>,
    ) -> Result<Error> {
        let row = sqlx::query(
            "SELECT status, attempts, max_attempts,
                    ($2::bigint IS NOT NULL
                     AND claimed_at <= now() - $2::bigint * INTERVAL '1 microsecond') AS stale
             FROM scrape_jobs WHERE id = $1",
        )
        .bind(job_id)
        .bind(window_micros)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(Error::JobNotFound(job_id));
        };

        let status: JobStatus = row
            .try_get::<String, _>("status")
            .map_err(Error::Database)?
            .parse()?;
        let attempts: i32 = row.try_get("attempts").map_err(Error::Database)?;
        let max_attempts: i32 = row.try_get("max_attempts").map_err(Error::Database)?;
        let stale: Option<bool> = row.try_get("stale").map_err(Error::Database)?;

        if status.is_terminal() {
            return Ok(Error::StaleClaim {
                job_id,
                worker_id: worker_id.to_string(),
            });
        }

        if status != JobStatus::InProgress || attempts < max_attempts || stale != Some(true) {
            return Ok(Error::ClaimFailed(job_id));
        }

        let abandoned = sqlx::query(
            "UPDATE scrape_jobs
             SET status = 'failed', error = $2, claimed_by = NULL, claimed_at = NULL,
                 updated_at = now(), completed_at = now()
             WHERE id = $1
               AND status = 'in_progress'
               AND attempts = $3
               AND attempts >= max_attempts
               AND claimed_at <= now() - $4::bigint * INTERVAL '1 microsecond'",
        )
        .bind(job_id)
        .bind(abandoned_message(attempts))
        .bind(attempts)
        .bind(window_micros)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if abandoned.rows_affected() == 1 {
            warn!(
                subsystem = "store",
                component = "jobs",
                op = "abandon",
                job_id = %job_id,
                attempts,
                "Stale job exhausted its attempts, marked failed"
            );
        }
        Ok(Error::ClaimFailed(job_id))
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, url: &str, options: ScrapeOptions) -> Result<Job> {
        let url = validate_job_url(url)?;
        let options_json = serde_json::to_value(&options)?;

        let row = sqlx::query(&format!(
            "INSERT INTO scrape_jobs (id, url, status, options, attempts, max_attempts,
                                      created_at, updated_at)
             VALUES ($1, $2, 'pending', $3, 0, $4, now(), now())
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(Uuid::now_v7())
        .bind(&url)
        .bind(&options_json)
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Self::parse_job_row(row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scrape_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(Error::JobNotFound(job_id)),
        }
    }

    async fn list(&self, request: ListJobsRequest) -> Result<Vec<Job>> {
        let request = request.normalized();
        let status = request.status.map(|s| s.as_str());

        let rows = sqlx::query(&format!(
            "SELECT {} FROM scrape_jobs
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
            JOB_COLUMNS
        ))
        .bind(status)
        .bind(request.page_size)
        .bind(request.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn list_claimable(&self, stale_after: Duration, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scrape_jobs
             WHERE status = 'pending'
                OR (status = 'in_progress'
                    AND $1::bigint IS NOT NULL
                    AND claimed_at <= now() - $1::bigint * INTERVAL '1 microsecond')
             ORDER BY created_at ASC, id ASC
             LIMIT $2",
            JOB_COLUMNS
        ))
        .bind(stale_window_micros(stale_after))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        stale_after: Duration,
    ) -> Result<Job> {
        let window_micros = stale_window_micros(stale_after);

        let row = sqlx::query(&format!(
            "UPDATE scrape_jobs
             SET status = 'in_progress', claimed_by = $2, claimed_at = now(),
                 attempts = attempts + 1, updated_at = now()
             WHERE id = $1
               AND attempts < max_attempts
               AND (status = 'pending'
                    OR (status = 'in_progress'
                        AND $3::bigint IS NOT NULL
                        AND claimed_at <= now() - $3::bigint * INTERVAL '1 microsecond'))
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(worker_id)
        .bind(window_micros)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(row) = row {
            let job = Self::parse_job_row(row)?;
            debug!(
                subsystem = "store",
                component = "jobs",
                op = "claim",
                job_id = %job_id,
                worker_id,
                attempt = job.attempts,
                "Job claimed"
            );
            return Ok(job);
        }

        Err(self.claim_rejection(job_id, worker_id, window_micros).await?)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: ScrapeResult,
    ) -> Result<Job> {
        let result_json = serde_json::to_value(&result)?;

        let row = sqlx::query(&format!(
            "UPDATE scrape_jobs
             SET status = 'completed', result = $3, error = NULL,
                 claimed_by = NULL, claimed_at = NULL,
                 updated_at = now(), completed_at = now()
             WHERE id = $1 AND status = 'in_progress' AND claimed_by = $2
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(worker_id)
        .bind(&result_json)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(self.ownership_error(job_id, worker_id).await),
        }
    }

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<Job> {
        // SET expressions all read the pre-update row, so both CASEs see the
        // same attempt count.
        let row = sqlx::query(&format!(
            "UPDATE scrape_jobs
             SET status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END,
                 error = $3, claimed_by = NULL, claimed_at = NULL, updated_at = now(),
                 completed_at = CASE WHEN attempts < max_attempts
                                     THEN NULL ELSE now() END
             WHERE id = $1 AND status = 'in_progress' AND claimed_by = $2
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Err(self.ownership_error(job_id, worker_id).await);
        };

        let job = Self::parse_job_row(row)?;
        if job.status == JobStatus::Pending {
            self.notify.notify_waiters();
        }
        Ok(job)
    }

    async fn delete(&self, job_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM scrape_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE created_at >= now() - $1::bigint * INTERVAL '1 hour')
                    AS recent
             FROM scrape_jobs",
        )
        .bind(defaults::STATS_RECENT_HOURS)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            total: row.get::<i64, _>("total"),
            pending: row.get::<i64, _>("pending"),
            in_progress: row.get::<i64, _>("in_progress"),
            completed: row.get::<i64, _>("completed"),
            failed: row.get::<i64, _>("failed"),
            recent_24h: row.get::<i64, _>("recent"),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
