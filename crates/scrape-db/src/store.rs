//! Store selection for binaries: PostgreSQL or in-memory, chosen at startup.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    defaults, log_pool_metrics, Database, Error, JobRepository, MemoryJobRepository,
    PgJobRepository, PoolConfig, Result,
};

/// Default database URL when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/scraper";

/// Which [`JobRepository`] implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreKind::Postgres),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => Err(Error::Config(format!(
                "unknown JOB_STORE '{}', expected 'postgres' or 'memory'",
                other
            ))),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Postgres => f.write_str("postgres"),
            StoreKind::Memory => f.write_str("memory"),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub database_url: String,
    /// Attempt budget stamped on new jobs.
    pub max_attempts: i32,
    /// Apply pending migrations on open (PostgreSQL only).
    pub run_migrations: bool,
    pub pool: PoolConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Postgres,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            run_migrations: true,
            pool: PoolConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Read `JOB_STORE`, `DATABASE_URL`, `MAX_ATTEMPTS` and
    /// `DATABASE_RUN_MIGRATIONS`. An unknown `JOB_STORE` is an error rather
    /// than a silent fallback.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let kind = match std::env::var("JOB_STORE") {
            Ok(v) if !v.trim().is_empty() => v.parse()?,
            _ => defaults.kind,
        };
        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let max_attempts = std::env::var("MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(defaults.max_attempts)
            .max(1);
        let run_migrations = std::env::var("DATABASE_RUN_MIGRATIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            kind,
            database_url,
            max_attempts,
            run_migrations,
            pool: PoolConfig::from_env(),
        })
    }

    pub fn with_kind(mut self, kind: StoreKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// An opened store plus the handle that wakes workers on new work.
pub struct JobStore {
    pub kind: StoreKind,
    pub repo: Arc<dyn JobRepository>,
    pub notify: Arc<Notify>,
}

impl JobStore {
    /// Open the configured store. PostgreSQL connects (and migrates when
    /// asked); memory starts empty.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match config.kind {
            StoreKind::Postgres => {
                info!(subsystem = "store", op = "open", kind = "postgres", "Connecting to database");
                let db = Database::connect_with_config(&config.database_url, config.pool.clone())
                    .await?;
                log_pool_metrics(&db.pool);
                if config.run_migrations {
                    migrate(&db).await?;
                }
                let repo = PgJobRepository::with_max_attempts(db.pool.clone(), config.max_attempts);
                Ok(Self {
                    kind: StoreKind::Postgres,
                    notify: repo.job_notify(),
                    repo: Arc::new(repo),
                })
            }
            StoreKind::Memory => {
                warn!(
                    subsystem = "store",
                    op = "open",
                    kind = "memory",
                    "Using in-memory job store; jobs are lost on restart"
                );
                Ok(Self::memory(config.max_attempts))
            }
        }
    }

    /// Fresh in-memory store.
    pub fn memory(max_attempts: i32) -> Self {
        let repo = MemoryJobRepository::with_max_attempts(max_attempts);
        Self {
            kind: StoreKind::Memory,
            notify: repo.job_notify(),
            repo: Arc::new(repo),
        }
    }
}

#[cfg(feature = "migrations")]
async fn migrate(db: &Database) -> Result<()> {
    info!(subsystem = "store", op = "migrate", "Running database migrations");
    db.migrate().await
}

#[cfg(not(feature = "migrations"))]
async fn migrate(_db: &Database) -> Result<()> {
    warn!(subsystem = "store", op = "migrate", "Built without migrations, skipping");
    Ok(())
}
