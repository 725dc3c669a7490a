//! Job lifecycle state machine.
//!
//! ```text
//!            claim                 extraction ok
//! pending ───────────► in_progress ──────────────► completed
//!    ▲                  │   │  ▲
//!    │ fail, retries    │   │  │ stale reclaim
//!    └──────────────────┘   │  └─ (new owner)
//!                           │ fail, retries exhausted
//!                           ▼
//!                         failed
//! ```
//!
//! Every function here mutates a [`Job`] in place and either applies the
//! whole transition or leaves the job untouched and returns an error. Stores
//! that keep jobs in memory call these directly under their lock; the
//! PostgreSQL store expresses the same guards as conditional `UPDATE`s.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{Job, JobStatus, ScrapeResult};

/// Which edge of the state machine an operation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `pending → in_progress`
    Claimed,
    /// `in_progress (stale) → in_progress` under a new owner
    Reclaimed,
    /// `in_progress (stale, attempts exhausted) → failed`
    Abandoned,
    /// `in_progress → completed`
    Completed,
    /// `in_progress → pending`, retries remain
    Retried,
    /// `in_progress → failed`, retries exhausted
    Failed,
}

impl Transition {
    /// Status the job holds after this transition.
    pub fn target_status(&self) -> JobStatus {
        match self {
            Transition::Claimed | Transition::Reclaimed => JobStatus::InProgress,
            Transition::Completed => JobStatus::Completed,
            Transition::Retried => JobStatus::Pending,
            Transition::Abandoned | Transition::Failed => JobStatus::Failed,
        }
    }
}

/// Convert a staleness window to a chrono duration, saturating on overflow.
pub fn stale_window(stale_after: Duration) -> chrono::Duration {
    chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX)
}

/// Claims taken at or before this instant are stale. `None` when the window
/// reaches past the representable range, in which case nothing is stale.
pub fn stale_cutoff(stale_after: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(stale_window(stale_after))
}

/// A claim is stale once `claimed_at + stale_after <= now`.
pub fn is_stale(job: &Job, stale_after: Duration, now: DateTime<Utc>) -> bool {
    if job.status != JobStatus::InProgress {
        return false;
    }
    match job.claimed_at {
        Some(claimed_at) => match claimed_at.checked_add_signed(stale_window(stale_after)) {
            Some(deadline) => deadline <= now,
            None => false,
        },
        // An in-progress job without a claim time violates the invariants;
        // treat it as abandoned so it can be recovered.
        None => true,
    }
}

/// Whether `try_claim` may succeed for this job right now.
pub fn is_claimable(job: &Job, stale_after: Duration, now: DateTime<Utc>) -> bool {
    job.status == JobStatus::Pending || is_stale(job, stale_after, now)
}

/// Take ownership of a pending or stale job.
///
/// Returns `StaleClaim` for terminal jobs and `ClaimFailed` when another
/// worker holds a live claim. A stale job whose attempts are already used up
/// is moved to `failed` and reported as [`Transition::Abandoned`]; the caller
/// did not win a claim.
pub fn claim(
    job: &mut Job,
    worker_id: &str,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<Transition> {
    if job.is_terminal() {
        return Err(Error::StaleClaim {
            job_id: job.id,
            worker_id: worker_id.to_string(),
        });
    }
    if !is_claimable(job, stale_after, now) {
        return Err(Error::ClaimFailed(job.id));
    }

    if job.attempts >= job.max_attempts {
        job.status = JobStatus::Failed;
        job.error = Some(abandoned_message(job.attempts));
        release(job);
        job.updated_at = now;
        job.completed_at = Some(now);
        return Ok(Transition::Abandoned);
    }

    let transition = if job.status == JobStatus::InProgress {
        Transition::Reclaimed
    } else {
        Transition::Claimed
    };

    job.status = JobStatus::InProgress;
    job.claimed_by = Some(worker_id.to_string());
    job.claimed_at = Some(now);
    job.attempts += 1;
    job.updated_at = now;
    Ok(transition)
}

/// Record a successful extraction. Only the current owner may complete.
pub fn complete(
    job: &mut Job,
    worker_id: &str,
    result: ScrapeResult,
    now: DateTime<Utc>,
) -> Result<Transition> {
    ensure_owner(job, worker_id)?;

    job.status = JobStatus::Completed;
    job.result = Some(result);
    job.error = None;
    release(job);
    job.updated_at = now;
    job.completed_at = Some(now);
    Ok(Transition::Completed)
}

/// Record a failed extraction. Returns the job to `pending` while attempts
/// remain, otherwise fails it for good. Only the current owner may fail.
pub fn fail(
    job: &mut Job,
    worker_id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<Transition> {
    ensure_owner(job, worker_id)?;

    job.error = Some(error.to_string());
    release(job);
    job.updated_at = now;

    if job.attempts < job.max_attempts {
        job.status = JobStatus::Pending;
        Ok(Transition::Retried)
    } else {
        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
        Ok(Transition::Failed)
    }
}

/// Error message recorded on a job abandoned by crashed workers.
pub fn abandoned_message(attempts: i32) -> String {
    format!(
        "abandoned after {} attempts without a reported outcome",
        attempts
    )
}

fn ensure_owner(job: &Job, worker_id: &str) -> Result<()> {
    if job.status == JobStatus::InProgress && job.claimed_by.as_deref() == Some(worker_id) {
        Ok(())
    } else {
        Err(Error::StaleClaim {
            job_id: job.id,
            worker_id: worker_id.to_string(),
        })
    }
}

fn release(job: &mut Job) {
    job.claimed_by = None;
    job.claimed_at = None;
}
