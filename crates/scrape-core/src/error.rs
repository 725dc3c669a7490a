//! Error types for the scrape job coordinator.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using the coordinator's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for job store and lifecycle operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The job store cannot be reached right now
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Invalid input supplied by the caller (bad URL, bad status filter, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another worker won the race for this job, or it is not claimable
    #[error("Claim failed for job {0}")]
    ClaimFailed(Uuid),

    /// The caller no longer owns the claim on this job
    #[error("Stale claim on job {job_id} by worker {worker_id}")]
    StaleClaim { job_id: Uuid, worker_id: String },

    /// Extraction collaborator failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for infrastructure failures the worker should back off from
    /// rather than treat as a verdict on a particular job.
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            Error::StoreUnavailable(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// True when a `complete`/`fail` call lost ownership of the job, either
    /// because another worker reclaimed it or because it was deleted.
    /// The worker discards the outcome in both cases.
    pub fn is_lost_ownership(&self) -> bool {
        matches!(self, Error::StaleClaim { .. } | Error::JobNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidInput(format!("invalid URL: {}", e))
    }
}
