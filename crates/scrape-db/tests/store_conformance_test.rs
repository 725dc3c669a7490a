//! Behavioral suite every job store must pass.
//!
//! Each check runs against the in-memory store on every `cargo test`. The
//! PostgreSQL variants need a disposable database (see
//! `scrape_db::test_fixtures`) and are ignored by default:
//!
//! ```text
//! DATABASE_URL=postgres://... cargo test -p scrape-db -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use scrape_db::{
    Error, JobRepository, JobStatus, ListJobsRequest, MemoryJobRepository, ScrapeOptions,
    ScrapeResult,
};

const LIVE: Duration = Duration::from_secs(3600);

fn result_titled(title: &str) -> ScrapeResult {
    ScrapeResult {
        url: "https://example.com".to_string(),
        title: Some(title.to_string()),
        text: Some("body".to_string()),
        links: vec!["https://example.com/a".to_string()],
        status_code: Some(200),
        ..Default::default()
    }
}

mod checks {
    use super::*;

    pub async fn create_starts_pending(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com/page", ScrapeOptions::default())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.url, "https://example.com/page");
        assert_eq!(job.attempts, 0);
        assert!(job.claimed_by.is_none());
        assert!(job.result.is_none());
        assert!(job.error.is_none());

        let fetched = repo.get(job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.url, job.url);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    pub async fn create_keeps_options(repo: Arc<dyn JobRepository>) {
        let options = ScrapeOptions {
            timeout_secs: Some(5),
            user_agent: Some("TestBot/2.0".to_string()),
        };
        let job = repo
            .create("https://example.com", options.clone())
            .await
            .unwrap();
        assert_eq!(repo.get(job.id).await.unwrap().options, options);
    }

    pub async fn invalid_url_rejected(repo: Arc<dyn JobRepository>) {
        for bad in ["", "example.com", "ftp://example.com/file"] {
            let err = repo.create(bad, ScrapeOptions::default()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?} accepted", bad);
        }
        assert_eq!(repo.stats().await.unwrap().total, 0);
    }

    pub async fn get_missing_is_not_found(repo: Arc<dyn JobRepository>) {
        let id = uuid::Uuid::now_v7();
        assert!(matches!(repo.get(id).await, Err(Error::JobNotFound(got)) if got == id));
    }

    pub async fn claim_is_exclusive(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();

        let job_id = job.id;
        let attempts = (0..8).map(|i| {
            let repo = repo.clone();
            let worker = format!("worker-{}", i);
            async move { repo.try_claim(job_id, &worker, LIVE).await }
        });
        let outcomes = join_all(attempts).await;

        let winners: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "exactly one worker must win the claim");
        for outcome in &outcomes {
            if let Err(e) = outcome {
                assert!(matches!(e, Error::ClaimFailed(_)), "unexpected error {:?}", e);
            }
        }

        let claimed = repo.get(job.id).await.unwrap();
        assert_eq!(claimed.status, JobStatus::InProgress);
        assert_eq!(claimed.claimed_by, winners[0].claimed_by);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.claimed_at.is_some());
    }

    pub async fn live_claim_blocks_others(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();

        let err = repo.try_claim(job.id, "worker-b", LIVE).await.unwrap_err();
        assert!(matches!(err, Error::ClaimFailed(_)));
        // The owner cannot double-claim either.
        let err = repo.try_claim(job.id, "worker-a", LIVE).await.unwrap_err();
        assert!(matches!(err, Error::ClaimFailed(_)));

        let current = repo.get(job.id).await.unwrap();
        assert_eq!(current.claimed_by.as_deref(), Some("worker-a"));
        assert_eq!(current.attempts, 1);
    }

    pub async fn complete_by_owner(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();

        let done = repo
            .complete(job.id, "worker-a", result_titled("Example Domain"))
            .await
            .unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.claimed_by.is_none());
        assert!(done.claimed_at.is_none());
        assert!(done.completed_at.is_some());

        let stored = repo.get(job.id).await.unwrap();
        let result = stored.result.expect("result stored");
        assert_eq!(result.title.as_deref(), Some("Example Domain"));
        assert_eq!(result.links, vec!["https://example.com/a".to_string()]);
        assert_eq!(result.status_code, Some(200));
    }

    pub async fn non_owner_cannot_finish(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();

        let err = repo
            .complete(job.id, "worker-b", result_titled("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleClaim { .. }));
        let err = repo.fail(job.id, "worker-b", "nope").await.unwrap_err();
        assert!(matches!(err, Error::StaleClaim { .. }));

        let current = repo.get(job.id).await.unwrap();
        assert_eq!(current.status, JobStatus::InProgress);
        assert_eq!(current.claimed_by.as_deref(), Some("worker-a"));
        assert!(current.result.is_none());
    }

    pub async fn stale_claim_is_reclaimed(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();

        // A zero window makes every existing claim stale.
        let reclaimed = repo
            .try_claim(job.id, "worker-b", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(reclaimed.claimed_by.as_deref(), Some("worker-b"));
        assert_eq!(reclaimed.attempts, 2);

        // The displaced owner has lost the job.
        let err = repo
            .complete(job.id, "worker-a", result_titled("late"))
            .await
            .unwrap_err();
        assert!(err.is_lost_ownership());

        repo.complete(job.id, "worker-b", result_titled("fresh"))
            .await
            .unwrap();
        let stored = repo.get(job.id).await.unwrap();
        assert_eq!(stored.result.unwrap().title.as_deref(), Some("fresh"));
    }

    pub async fn list_claimable_includes_stale(repo: Arc<dyn JobRepository>) {
        let first = repo
            .create("https://example.com/1", ScrapeOptions::default())
            .await
            .unwrap();
        let second = repo
            .create("https://example.com/2", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(first.id, "worker-a", LIVE).await.unwrap();

        let live: Vec<_> = repo
            .list_claimable(LIVE, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(live, vec![second.id]);

        let with_stale: Vec<_> = repo
            .list_claimable(Duration::ZERO, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(with_stale, vec![first.id, second.id], "oldest first");

        assert_eq!(repo.list_claimable(Duration::ZERO, 1).await.unwrap().len(), 1);
    }

    /// Store built with a budget of two attempts.
    pub async fn retry_then_fail(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        assert_eq!(job.max_attempts, 2);

        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();
        let retried = repo.fail(job.id, "worker-a", "timeout: 30s").await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.error.as_deref(), Some("timeout: 30s"));
        assert!(retried.claimed_by.is_none());
        assert!(retried.completed_at.is_none());

        repo.try_claim(job.id, "worker-b", LIVE).await.unwrap();
        let failed = repo.fail(job.id, "worker-b", "http: 503").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert_eq!(failed.error.as_deref(), Some("http: 503"));
        assert!(failed.completed_at.is_some());

        let err = repo
            .try_claim(job.id, "worker-c", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleClaim { .. }));
    }

    /// Store built with a budget of one attempt.
    pub async fn exhausted_stale_job_is_abandoned(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "crashed-worker", LIVE).await.unwrap();

        let err = repo
            .try_claim(job.id, "worker-b", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClaimFailed(_)));

        let abandoned = repo.get(job.id).await.unwrap();
        assert_eq!(abandoned.status, JobStatus::Failed);
        assert_eq!(abandoned.attempts, 1);
        assert!(abandoned.claimed_by.is_none());
        assert!(abandoned.error.unwrap().contains("abandoned"));
    }

    pub async fn terminal_jobs_are_frozen(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();
        repo.complete(job.id, "worker-a", result_titled("done"))
            .await
            .unwrap();
        let frozen = repo.get(job.id).await.unwrap();

        let err = repo
            .try_claim(job.id, "worker-b", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleClaim { .. }));
        let err = repo.fail(job.id, "worker-a", "late").await.unwrap_err();
        assert!(matches!(err, Error::StaleClaim { .. }));
        let err = repo
            .complete(job.id, "worker-a", result_titled("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleClaim { .. }));

        assert_eq!(repo.get(job.id).await.unwrap(), frozen);
    }

    pub async fn delete_removes_job(repo: Arc<dyn JobRepository>) {
        let job = repo
            .create("https://example.com", ScrapeOptions::default())
            .await
            .unwrap();
        repo.try_claim(job.id, "worker-a", LIVE).await.unwrap();

        repo.delete(job.id).await.unwrap();

        assert!(matches!(repo.get(job.id).await, Err(Error::JobNotFound(_))));
        assert!(matches!(repo.delete(job.id).await, Err(Error::JobNotFound(_))));
        let err = repo
            .complete(job.id, "worker-a", result_titled("orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
        assert!(err.is_lost_ownership());
        let err = repo.try_claim(job.id, "worker-b", LIVE).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_) | Error::ClaimFailed(_)));
    }

    pub async fn list_newest_first_with_filter_and_pages(repo: Arc<dyn JobRepository>) {
        let mut ids = Vec::new();
        for i in 0..5 {
            let job = repo
                .create(&format!("https://example.com/{}", i), ScrapeOptions::default())
                .await
                .unwrap();
            ids.push(job.id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        repo.try_claim(ids[1], "worker-a", LIVE).await.unwrap();

        let all: Vec<_> = repo
            .list(ListJobsRequest::default())
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        let newest_first: Vec<_> = ids.iter().rev().copied().collect();
        assert_eq!(all, newest_first);

        let page2: Vec<_> = repo
            .list(ListJobsRequest::new(None, 2, 2))
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(page2, vec![ids[2], ids[1]]);

        let in_progress = repo
            .list(ListJobsRequest::new(Some(JobStatus::InProgress), 1, 100))
            .await
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, ids[1]);

        let past_end = repo.list(ListJobsRequest::new(None, 10, 100)).await.unwrap();
        assert!(past_end.is_empty());
    }

    pub async fn stats_count_by_status(repo: Arc<dyn JobRepository>) {
        let a = repo
            .create("https://example.com/a", ScrapeOptions::default())
            .await
            .unwrap();
        let b = repo
            .create("https://example.com/b", ScrapeOptions::default())
            .await
            .unwrap();
        repo.create("https://example.com/c", ScrapeOptions::default())
            .await
            .unwrap();

        repo.try_claim(a.id, "worker-a", LIVE).await.unwrap();
        repo.try_claim(b.id, "worker-a", LIVE).await.unwrap();
        repo.complete(b.id, "worker-a", result_titled("b"))
            .await
            .unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.recent_24h, 3);
        repo.ping().await.unwrap();
    }
}

fn memory(max_attempts: i32) -> Arc<dyn JobRepository> {
    Arc::new(MemoryJobRepository::with_max_attempts(max_attempts))
}

#[tokio::test]
async fn memory_create_starts_pending() {
    checks::create_starts_pending(memory(3)).await;
}

#[tokio::test]
async fn memory_create_keeps_options() {
    checks::create_keeps_options(memory(3)).await;
}

#[tokio::test]
async fn memory_invalid_url_rejected() {
    checks::invalid_url_rejected(memory(3)).await;
}

#[tokio::test]
async fn memory_get_missing_is_not_found() {
    checks::get_missing_is_not_found(memory(3)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_claim_is_exclusive() {
    checks::claim_is_exclusive(memory(3)).await;
}

#[tokio::test]
async fn memory_live_claim_blocks_others() {
    checks::live_claim_blocks_others(memory(3)).await;
}

#[tokio::test]
async fn memory_complete_by_owner() {
    checks::complete_by_owner(memory(3)).await;
}

#[tokio::test]
async fn memory_non_owner_cannot_finish() {
    checks::non_owner_cannot_finish(memory(3)).await;
}

#[tokio::test]
async fn memory_stale_claim_is_reclaimed() {
    checks::stale_claim_is_reclaimed(memory(3)).await;
}

#[tokio::test]
async fn memory_list_claimable_includes_stale() {
    checks::list_claimable_includes_stale(memory(3)).await;
}

#[tokio::test]
async fn memory_retry_then_fail() {
    checks::retry_then_fail(memory(2)).await;
}

#[tokio::test]
async fn memory_exhausted_stale_job_is_abandoned() {
    checks::exhausted_stale_job_is_abandoned(memory(1)).await;
}

#[tokio::test]
async fn memory_terminal_jobs_are_frozen() {
    checks::terminal_jobs_are_frozen(memory(3)).await;
}

#[tokio::test]
async fn memory_delete_removes_job() {
    checks::delete_removes_job(memory(3)).await;
}

#[tokio::test]
async fn memory_list_newest_first_with_filter_and_pages() {
    checks::list_newest_first_with_filter_and_pages(memory(3)).await;
}

#[tokio::test]
async fn memory_stats_count_by_status() {
    checks::stats_count_by_status(memory(3)).await;
}

/// Runs the whole suite sequentially against one PostgreSQL database,
/// wiping the table between checks.
#[cfg(feature = "migrations")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn postgres_conformance() {
    use scrape_db::test_fixtures::TestDatabase;

    async fn fresh(max_attempts: i32) -> Arc<dyn JobRepository> {
        let test_db = TestDatabase::new(max_attempts)
            .await
            .expect("test database available");
        Arc::new(test_db.db.jobs)
    }

    checks::create_starts_pending(fresh(3).await).await;
    checks::create_keeps_options(fresh(3).await).await;
    checks::invalid_url_rejected(fresh(3).await).await;
    checks::get_missing_is_not_found(fresh(3).await).await;
    checks::claim_is_exclusive(fresh(3).await).await;
    checks::live_claim_blocks_others(fresh(3).await).await;
    checks::complete_by_owner(fresh(3).await).await;
    checks::non_owner_cannot_finish(fresh(3).await).await;
    checks::stale_claim_is_reclaimed(fresh(3).await).await;
    checks::list_claimable_includes_stale(fresh(3).await).await;
    checks::retry_then_fail(fresh(2).await).await;
    checks::exhausted_stale_job_is_abandoned(fresh(1).await).await;
    checks::terminal_jobs_are_frozen(fresh(3).await).await;
    checks::delete_removes_job(fresh(3).await).await;
    checks::list_newest_first_with_filter_and_pages(fresh(3).await).await;
    checks::stats_count_by_status(fresh(3).await).await;
}

/// Staleness is judged against the database clock: a claim backdated in the
/// database is stale for a short window and live for a longer one, no matter
/// what the test host's clock reads.
#[cfg(feature = "migrations")]
#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn postgres_staleness_uses_database_clock() {
    use scrape_db::test_fixtures::TestDatabase;

    let test_db = TestDatabase::new(3).await.expect("test database available");
    let store = &test_db.db.jobs;
    let job = store
        .create("https://example.com/clock", ScrapeOptions::default())
        .await
        .unwrap();
    store.try_claim(job.id, "worker-a", LIVE).await.unwrap();

    sqlx::query("UPDATE scrape_jobs SET claimed_at = now() - INTERVAL '10 minutes' WHERE id = $1")
        .bind(job.id)
        .execute(&test_db.pool)
        .await
        .unwrap();

    let err = store
        .try_claim(job.id, "worker-b", Duration::from_secs(15 * 60))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClaimFailed(_)));
    let listed = store
        .list_claimable(Duration::from_secs(15 * 60), 10)
        .await
        .unwrap();
    assert!(listed.is_empty());

    let listed = store
        .list_claimable(Duration::from_secs(5 * 60), 10)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let reclaimed = store
        .try_claim(job.id, "worker-b", Duration::from_secs(5 * 60))
        .await
        .unwrap();
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("worker-b"));
    assert_eq!(reclaimed.attempts, 2);

    let db_now: chrono::DateTime<chrono::Utc> = sqlx::query_scalar("SELECT now()")
        .fetch_one(&test_db.pool)
        .await
        .unwrap();
    let claimed_at = reclaimed.claimed_at.unwrap();
    assert!((db_now - claimed_at).num_seconds().abs() < 5);
}
