//! Core data models for scrape jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB STATUS
// =============================================================================

/// Status of a scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Wire and storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown job status '{}', expected one of: pending, in_progress, completed, failed",
                other
            ))),
        }
    }
}

// =============================================================================
// JOB
// =============================================================================

/// Per-job scrape options supplied at submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    /// Extraction timeout override in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// User-Agent override for the fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Structured output of the extraction collaborator, stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeResult {
    pub url: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub links: Vec<String>,
    pub screenshot_ref: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub scraped_at: Option<DateTime<Utc>>,
}

/// A scrape job and its lifecycle state.
///
/// Invariants (enforced by [`crate::lifecycle`] and every store):
/// - `Pending` ⇔ `claimed_by` is `None`
/// - `InProgress` ⇒ `claimed_by` and `claimed_at` are set
/// - terminal states clear the claim and never change again
/// - `attempts` never decreases and never exceeds `max_attempts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub status: JobStatus,
    pub options: ScrapeOptions,
    pub attempts: i32,
    pub max_attempts: i32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub result: Option<ScrapeResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a new pending job. The URL must already be validated.
    pub fn new_pending(
        url: String,
        options: ScrapeOptions,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            url,
            status: JobStatus::Pending,
            options,
            attempts: 0,
            max_attempts,
            claimed_by: None,
            claimed_at: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Validate a submitted URL: absolute, `http`/`https`, with a host.
///
/// Returns the trimmed input unchanged so the stored URL is exactly what the
/// client submitted.
pub fn validate_job_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("URL must not be empty".to_string()));
    }

    let parsed = Url::parse(trimmed)?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "URL must start with http:// or https:// (got scheme '{}')",
                other
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidInput("URL must include a host".to_string()));
    }

    Ok(trimmed.to_string())
}

// =============================================================================
// QUERIES
// =============================================================================

/// Listing request: optional status filter plus 1-based pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListJobsRequest {
    pub status: Option<JobStatus>,
    pub page: i64,
    pub page_size: i64,
}

impl Default for ListJobsRequest {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: defaults::PAGE_SIZE,
        }
    }
}

impl ListJobsRequest {
    pub fn new(status: Option<JobStatus>, page: i64, page_size: i64) -> Self {
        Self {
            status,
            page,
            page_size,
        }
        .normalized()
    }

    /// Clamp page to `>= 1` and page size to `[1, PAGE_SIZE_MAX]`.
    pub fn normalized(self) -> Self {
        Self {
            status: self.status,
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, defaults::PAGE_SIZE_MAX),
        }
    }

    /// Row offset of the first job on this page.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.page_size
    }
}

/// Job counts for the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    /// Jobs created within the last [`defaults::STATS_RECENT_HOURS`] hours.
    pub recent_24h: i64,
}

impl QueueStats {
    /// Count of jobs in the given status.
    pub fn count_for(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::InProgress => self.in_progress,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }
}
