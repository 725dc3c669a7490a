//! # scrape-db
//!
//! Job store implementations for the scrape job coordinator.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobRepository`], the durable PostgreSQL store
//! - [`MemoryJobRepository`], a volatile store with identical semantics
//! - Schema migrations (behind the `migrations` feature)
//! - [`JobStore`], the `JOB_STORE` switch binaries use to pick one
//!
//! ## Example
//!
//! ```rust,ignore
//! use scrape_db::{Database, JobRepository, ScrapeOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/scraper").await?;
//!     db.migrate().await?;
//!
//!     let job = db.jobs.create("https://example.com", ScrapeOptions::default()).await?;
//!     println!("Created job: {}", job.id);
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod store;

// Always compiled so integration tests in tests/ can share the URL default.
pub mod test_fixtures;

// Re-export core types
pub use scrape_core::*;

pub use jobs::PgJobRepository;
pub use memory::MemoryJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use store::{JobStore, StoreConfig, StoreKind, DEFAULT_DATABASE_URL};

/// Database context: the pool plus the job repository built on it.
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub jobs: PgJobRepository,
}

impl Database {
    /// Wrap an existing pool. New jobs get the default attempt budget.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Wrap an existing pool with a custom attempt budget for new jobs.
    pub fn with_max_attempts(pool: sqlx::Pool<sqlx::Postgres>, max_attempts: i32) -> Self {
        Self {
            jobs: PgJobRepository::with_max_attempts(pool.clone(), max_attempts),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
