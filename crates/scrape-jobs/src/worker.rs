//! Polling worker that claims scrape jobs and runs them to an outcome.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use scrape_core::{defaults, Error, Job, JobRepository, JobStatus, Result};

use crate::extractor::{ExtractOptions, Extractor, FetchError};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity recorded in `claimed_by`. Must be unique per running worker.
    pub worker_id: String,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    /// Extraction timeout for jobs that do not set their own.
    pub default_timeout: Duration,
    /// How long a claim lives before another worker may take the job over.
    pub stale_after: Duration,
    /// Attempt budget for jobs created by stores this worker's process builds.
    pub max_attempts: i32,
    /// Ceiling for the poll delay after repeated store errors.
    pub max_poll_backoff: Duration,
    /// How long shutdown waits for in-flight jobs before abandoning them.
    pub shutdown_grace: Duration,
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            poll_interval: Duration::from_secs(defaults::JOB_POLL_INTERVAL_SECS),
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            default_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            stale_after: Duration::from_secs(defaults::JOB_STALE_AFTER_SECS),
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            max_poll_backoff: Duration::from_secs(defaults::JOB_MAX_POLL_BACKOFF_SECS),
            shutdown_grace: Duration::from_secs(defaults::JOB_SHUTDOWN_GRACE_SECS),
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ID` | `worker-<pid>` | Claim owner identity |
    /// | `POLL_INTERVAL` | `5` | Seconds between poll cycles |
    /// | `MAX_CONCURRENT_JOBS` | `3` | Jobs processed at once |
    /// | `DEFAULT_TIMEOUT` | `30` | Per-job extraction timeout (seconds) |
    /// | `STALE_AFTER` | `300` | Claim lifetime before reclaim (seconds) |
    /// | `MAX_ATTEMPTS` | `3` | Claims per job before it fails |
    /// | `MAX_POLL_BACKOFF` | `60` | Poll delay ceiling after errors (seconds) |
    /// | `SHUTDOWN_GRACE` | `30` | Drain time on shutdown (seconds) |
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_id = std::env::var("WORKER_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.worker_id);

        Self {
            worker_id,
            poll_interval: env_secs("POLL_INTERVAL").unwrap_or(defaults.poll_interval),
            max_concurrent_jobs: env_parse::<usize>("MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            default_timeout: env_secs("DEFAULT_TIMEOUT").unwrap_or(defaults.default_timeout),
            stale_after: env_secs("STALE_AFTER").unwrap_or(defaults.stale_after),
            max_attempts: env_parse::<i32>("MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts)
                .max(1),
            max_poll_backoff: env_secs("MAX_POLL_BACKOFF").unwrap_or(defaults.max_poll_backoff),
            shutdown_grace: env_secs("SHUTDOWN_GRACE").unwrap_or(defaults.shutdown_grace),
            enabled,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set maximum concurrent jobs (at least one).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_max_poll_backoff(mut self, max: Duration) -> Self {
        self.max_poll_backoff = max;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Extraction timeout for a job: its own `timeout_secs`, else the default,
    /// capped at [`Self::max_job_timeout`].
    pub fn timeout_for(&self, job: &Job) -> Duration {
        job.options
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_job_timeout())
    }

    /// Longest extraction allowed: four fifths of `stale_after`, so the
    /// outcome is reported while the claim is still live.
    pub fn max_job_timeout(&self) -> Duration {
        self.stale_after - self.stale_after / 5
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

/// Delay before the next poll after `consecutive_errors` failed polls in a
/// row: the poll interval doubled per error, capped at `max_backoff`.
pub fn poll_delay(
    poll_interval: Duration,
    max_backoff: Duration,
    consecutive_errors: u32,
) -> Duration {
    if consecutive_errors == 0 {
        return poll_interval;
    }
    let factor = 1u32.checked_shl(consecutive_errors.min(31)).unwrap_or(u32::MAX);
    poll_interval
        .checked_mul(factor)
        .unwrap_or(max_backoff)
        .min(max_backoff.max(poll_interval))
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted { worker_id: String },
    WorkerStopped { worker_id: String },
    /// This worker won the claim and started extraction.
    JobClaimed { job_id: Uuid, attempt: i32 },
    JobCompleted { job_id: Uuid, duration_ms: u64 },
    /// Extraction failed and the job went back to pending.
    JobRetried { job_id: Uuid, error: String },
    /// Extraction failed and the job is out of attempts.
    JobFailed { job_id: Uuid, error: String },
    /// Another worker won the race for a candidate.
    ClaimLost { job_id: Uuid },
    /// The job was reclaimed or deleted while this worker processed it; the
    /// outcome was dropped.
    StaleClaimDiscarded { job_id: Uuid },
    /// Polling the store failed; the next poll waits `retry_in`.
    PollError { error: String, retry_in: Duration },
}

/// Snapshot of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Extractions that reached an outcome (success, failure, or timeout).
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Ids of jobs this worker is currently running.
type RunningJobs = Arc<Mutex<HashSet<Uuid>>>;

fn lock_running(running: &RunningJobs) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a job as in flight on this worker until dropped, including when
/// its task is aborted.
struct InFlight {
    job_id: Uuid,
    stats: Arc<StatsCounters>,
    running: RunningJobs,
}

impl InFlight {
    fn enter(job_id: Uuid, stats: &Arc<StatsCounters>, running: &RunningJobs) -> Self {
        stats.in_flight.fetch_add(1, Ordering::Relaxed);
        lock_running(running).insert(job_id);
        Self {
            job_id,
            stats: stats.clone(),
            running: running.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock_running(&self.running).remove(&self.job_id);
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    stats: Arc<StatsCounters>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop claiming and drain.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Wait for the worker loop to exit (after `shutdown`, or immediately if
    /// the worker is disabled) and return the final counters.
    pub async fn wait(self) -> Result<WorkerStats> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))?;
        Ok(self.stats.snapshot())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }
}

/// Job worker that discovers, claims, and processes scrape jobs.
pub struct JobWorker {
    store: Arc<dyn JobRepository>,
    extractor: Arc<dyn Extractor>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    stats: Arc<StatsCounters>,
    running: RunningJobs,
    notify: Option<Arc<Notify>>,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobRepository>,
        extractor: Arc<dyn Extractor>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            store,
            extractor,
            config,
            event_tx,
            stats: Arc::new(StatsCounters::default()),
            running: Arc::new(Mutex::new(HashSet::new())),
            notify: None,
        }
    }

    /// Wake the poll loop early whenever the store signals new pending work.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            stats,
            task,
        }
    }

    /// Poll, claim up to the free budget, and keep polling while claimed jobs
    /// run in their own tasks.
    #[instrument(skip(self, shutdown_rx), fields(worker_id = %self.config.worker_id))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent_jobs,
            stale_after_secs = self.config.stale_after.as_secs(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted {
            worker_id: self.config.worker_id.clone(),
        });

        let budget = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut tasks = JoinSet::new();
        let mut consecutive_errors: u32 = 0;

        loop {
            while let Some(joined) = tasks.try_join_next() {
                log_task_exit(joined);
            }

            match self.poll_once(&budget, &mut tasks).await {
                Ok(claimed) => {
                    consecutive_errors = 0;
                    if claimed > 0 {
                        debug!(claimed, in_flight = tasks.len(), "Claimed jobs");
                    }
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let retry_in = poll_delay(
                        self.config.poll_interval,
                        self.config.max_poll_backoff,
                        consecutive_errors,
                    );
                    warn!(
                        error = %e,
                        consecutive_errors,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "Job poll failed, backing off"
                    );
                    let _ = self.event_tx.send(WorkerEvent::PollError {
                        error: e.to_string(),
                        retry_in,
                    });
                }
            }

            let delay = poll_delay(
                self.config.poll_interval,
                self.config.max_poll_backoff,
                consecutive_errors,
            );
            // Finished jobs free budget, so they wake the loop too, but only
            // while the store is healthy.
            let wake_on_finish = consecutive_errors == 0 && !tasks.is_empty();

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job worker received shutdown signal");
                    break;
                }
                _ = sleep(delay) => {}
                _ = wait_for_work(self.notify.as_deref()), if consecutive_errors == 0 => {}
                Some(joined) = tasks.join_next(), if wake_on_finish => {
                    log_task_exit(joined);
                }
            }
        }

        self.drain(&mut tasks).await;

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped {
            worker_id: self.config.worker_id.clone(),
        });
        info!("Job worker stopped");
    }

    /// One discovery pass. Returns how many jobs were claimed.
    async fn poll_once(&self, budget: &Arc<Semaphore>, tasks: &mut JoinSet<()>) -> Result<usize> {
        let free = budget.available_permits();
        if free == 0 {
            return Ok(0);
        }

        // Jobs this worker is running still show up once their claim ages,
        // so leave room for them in the candidate list.
        let running = lock_running(&self.running).len();
        let limit = (free * defaults::CLAIM_CANDIDATE_FACTOR + running) as i64;
        let candidates = self
            .store
            .list_claimable(self.config.stale_after, limit)
            .await?;

        let mut claimed = 0;
        for candidate in candidates {
            if lock_running(&self.running).contains(&candidate.id) {
                continue;
            }
            let Ok(permit) = budget.clone().try_acquire_owned() else {
                break;
            };

            match self
                .store
                .try_claim(candidate.id, &self.config.worker_id, self.config.stale_after)
                .await
            {
                Ok(job) => {
                    claimed += 1;
                    let runner = self.runner();
                    let in_flight = InFlight::enter(job.id, &self.stats, &self.running);
                    tasks.spawn(runner.execute(job, permit, in_flight));
                }
                Err(Error::ClaimFailed(job_id))
                | Err(Error::StaleClaim { job_id, .. })
                | Err(Error::JobNotFound(job_id)) => {
                    debug!(%job_id, "Lost claim race, moving on");
                    let _ = self.event_tx.send(WorkerEvent::ClaimLost { job_id });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(claimed)
    }

    /// Wait up to the grace period for in-flight jobs, then abort the rest.
    /// Aborted jobs stay `in_progress` and become reclaimable once stale.
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!(
            in_flight = tasks.len(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "Waiting for in-flight jobs"
        );

        let waited = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_task_exit(joined);
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                abandoned = tasks.len(),
                "Shutdown grace elapsed, abandoning in-flight jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    fn runner(&self) -> JobRunner {
        JobRunner {
            store: self.store.clone(),
            extractor: self.extractor.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

async fn wait_for_work(notify: Option<&Notify>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

fn log_task_exit(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = ?e, "Job task panicked");
        }
    }
}

/// What a spawned job task needs, detached from the worker itself.
struct JobRunner {
    store: Arc<dyn JobRepository>,
    extractor: Arc<dyn Extractor>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    stats: Arc<StatsCounters>,
}

impl JobRunner {
    /// Run extraction for a claimed job and record the outcome. The permit is
    /// held for the whole task so the budget counts it.
    async fn execute(self, job: Job, _permit: OwnedSemaphorePermit, _in_flight: InFlight) {
        let start = Instant::now();
        let job_id = job.id;
        let timeout = self.config.timeout_for(&job);

        info!(
            %job_id,
            url = %job.url,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            timeout_secs = timeout.as_secs(),
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobClaimed {
            job_id,
            attempt: job.attempts,
        });

        let options = ExtractOptions {
            timeout,
            user_agent: job.options.user_agent.clone(),
        };
        let outcome =
            match tokio::time::timeout(timeout, self.extractor.fetch_and_extract(&job.url, &options))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout(format!(
                    "extraction exceeded {}ms",
                    timeout.as_millis()
                ))),
            };

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                match self
                    .store
                    .complete(job_id, &self.config.worker_id, result)
                    .await
                {
                    Ok(_) => {
                        info!(%job_id, duration_ms, "Job completed");
                        let _ = self
                            .event_tx
                            .send(WorkerEvent::JobCompleted { job_id, duration_ms });
                    }
                    Err(e) => self.record_failure(job_id, "complete", e),
                }
            }
            Err(fetch_error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let message = fetch_error.to_string();
                match self
                    .store
                    .fail(job_id, &self.config.worker_id, &message)
                    .await
                {
                    Ok(updated) if updated.status == JobStatus::Pending => {
                        warn!(
                            %job_id,
                            error = %message,
                            attempt = updated.attempts,
                            duration_ms,
                            "Job failed, will retry"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobRetried {
                            job_id,
                            error: message,
                        });
                    }
                    Ok(updated) => {
                        warn!(
                            %job_id,
                            error = %message,
                            attempts = updated.attempts,
                            duration_ms,
                            "Job failed permanently"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobFailed {
                            job_id,
                            error: message,
                        });
                    }
                    Err(e) => self.record_failure(job_id, "fail", e),
                }
            }
        }
    }

    /// A lost claim is expected and dropped quietly. Any other store error
    /// leaves the job in progress until its claim goes stale.
    fn record_failure(&self, job_id: Uuid, op: &'static str, e: Error) {
        if e.is_lost_ownership() {
            info!(%job_id, op, reason = %e, "Job no longer owned, outcome discarded");
            let _ = self
                .event_tx
                .send(WorkerEvent::StaleClaimDiscarded { job_id });
        } else {
            error!(%job_id, op, error = %e, "Failed to record job outcome");
        }
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    store: Arc<dyn JobRepository>,
    extractor: Arc<dyn Extractor>,
    config: WorkerConfig,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(store: Arc<dyn JobRepository>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            store,
            extractor,
            config: WorkerConfig::default(),
            notify: None,
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Wake on new pending work (see `job_notify()` on the stores).
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> JobWorker {
        let worker = JobWorker::new(self.store, self.extractor, self.config);
        match self.notify {
            Some(notify) => worker.with_notify(notify),
            None => worker,
        }
    }
}
