//! # Job Runner
//!
//! Polling loop that claims the next eligible job, dispatches it to the
//! handler registered for its type and records the outcome. Distinct
//! repositories run concurrently; a repository never runs two jobs at once.
//! New work is not started while the remote cooldown is active.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::models::job::Model as Job;
use crate::remote::RateLimitState;
use crate::repositories::{JobStore, JobStoreError};

/// Failure a handler reports for one job. Every variant ends in `failed`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job arguments: {0}")]
    InvalidArguments(String),
    #[error("no handler registered for job type '{0}'")]
    UnknownJobType(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Value of `jobs.job_type` this handler executes.
    fn job_type(&self) -> &'static str;

    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, replacing any previous handler for the same type.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// Attempts `dispatch` makes to write a job's outcome before deferring it.
const OUTCOME_WRITE_ATTEMPTS: u32 = 3;
const OUTCOME_RETRY_BASE: Duration = Duration::from_millis(50);

/// Terminal status whose write failed; the repository stays in flight until
/// a later tick records it.
#[derive(Debug, Clone)]
struct UnrecordedOutcome {
    job_id: uuid::Uuid,
    repo_id: i64,
    error: Option<String>,
}

impl UnrecordedOutcome {
    async fn record(&self, store: &JobStore) -> Result<(), JobStoreError> {
        match &self.error {
            None => store.mark_completed(self.job_id).await?,
            Some(error) => store.mark_failed(self.job_id, error).await?,
        };
        Ok(())
    }
}

/// What one tick of the runner did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Dispatched(uuid::Uuid),
    Idle,
    CoolingDown(Duration),
}

pub struct JobRunner {
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    rate_limit: Arc<RateLimitState>,
    config: RunnerConfig,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    unrecorded: Arc<Mutex<Vec<UnrecordedOutcome>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        registry: Arc<HandlerRegistry>,
        rate_limit: Arc<RateLimitState>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            rate_limit,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            unrecorded: Arc::new(Mutex::new(Vec::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Run until `shutdown` fires, then wait for dispatched jobs to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_ms = self.config.tick_interval_ms,
            handlers = ?self.registry.job_types(),
            "starting job runner"
        );
        let purge_every = Duration::from_secs(self.config.purge_interval_seconds);
        let mut next_purge = Instant::now();

        loop {
            self.reap_finished_tasks();

            if Instant::now() >= next_purge {
                self.purge().await;
                next_purge = Instant::now() + purge_every;
            }

            let delay = match self.tick().await {
                Ok(TickOutcome::Dispatched(_)) => Duration::ZERO,
                Ok(TickOutcome::Idle) => self.config.tick_interval(),
                Ok(TickOutcome::CoolingDown(remaining)) => remaining,
                Err(err) => {
                    error!(error = %err, "runner tick failed");
                    self.config.tick_interval()
                }
            };

            if delay.is_zero() {
                if shutdown.is_cancelled() {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!("job runner shutting down, waiting for in-flight jobs");
        self.wait_idle().await;
        info!("job runner stopped");
    }

    /// Claim and dispatch at most one job.
    ///
    /// Outcomes whose write failed earlier are retried first.
    pub async fn tick(&self) -> Result<TickOutcome, JobStoreError> {
        self.retry_unrecorded().await;

        if let Some(remaining) = self.rate_limit.cooldown_remaining() {
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                "remote cooling down, not starting new jobs"
            );
            counter!("tracksync_runner_cooldown_skips_total").increment(1);
            return Ok(TickOutcome::CoolingDown(remaining));
        }

        let mut excluded = self.store.processing_repo_ids().await?;
        excluded.extend(self.lock_in_flight().iter().copied());

        let Some(job) = self.store.claim_next(&excluded).await? else {
            return Ok(TickOutcome::Idle);
        };

        let job_id = job.id;
        let in_flight = {
            let mut set = self.lock_in_flight();
            set.insert(job.repo_id);
            set.len()
        };
        gauge!("tracksync_runner_in_flight").set(in_flight as f64);

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            repo_id = job.repo_id,
            "dispatching job"
        );

        let span = info_span!(
            "job",
            job_id = %job.id,
            job_type = %job.job_type,
            repo_id = job.repo_id
        );
        let dispatch = dispatch(
            self.store.clone(),
            self.registry.clone(),
            self.in_flight.clone(),
            self.unrecorded.clone(),
            job,
        )
        .instrument(span);
        self.lock_tasks().spawn(dispatch);

        Ok(TickOutcome::Dispatched(job_id))
    }

    /// Wait until every dispatched job has recorded its outcome.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "job dispatch task failed");
            }
        }
    }

    pub fn in_flight_repo_ids(&self) -> HashSet<i64> {
        self.lock_in_flight().clone()
    }

    async fn retry_unrecorded(&self) {
        let pending = std::mem::take(
            &mut *self
                .unrecorded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if pending.is_empty() {
            return;
        }

        let mut still_pending = Vec::new();
        for outcome in pending {
            match outcome.record(&self.store).await {
                Ok(()) => {
                    info!(job_id = %outcome.job_id, "deferred job outcome recorded");
                    release(&self.in_flight, outcome.repo_id);
                }
                Err(err) => {
                    warn!(job_id = %outcome.job_id, error = %err, "job outcome still not recorded");
                    still_pending.push(outcome);
                }
            }
        }

        if !still_pending.is_empty() {
            self.unrecorded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend(still_pending);
        }
    }

    async fn purge(&self) {
        let retention = chrono::Duration::seconds(self.config.job_retention_seconds as i64);
        if let Err(err) = self.store.purge_expired(retention).await {
            warn!(error = %err, "job purge failed");
        }
    }

    fn reap_finished_tasks(&self) {
        let mut tasks = self.lock_tasks();
        while let Some(result) = tasks.try_join_next() {
            if let Err(err) = result {
                error!(error = %err, "job dispatch task failed");
            }
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Execute one claimed job and always record a terminal status.
///
/// The repository is released only once the status is written; if every
/// attempt fails the outcome is handed to later ticks.
async fn dispatch(
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    unrecorded: Arc<Mutex<Vec<UnrecordedOutcome>>>,
    job: Job,
) {
    let started = Instant::now();
    let job_type = job.job_type.clone();

    let result = match registry.get(&job.job_type) {
        None => Err(JobError::UnknownJobType(job.job_type.clone())),
        Some(handler) => {
            let claimed = job.clone();
            // Run on its own task so a panic surfaces as a JoinError here.
            match tokio::spawn(async move { handler.handle(&claimed).await }).await {
                Ok(result) => result,
                Err(join_err) => Err(JobError::Panicked(panic_message(join_err))),
            }
        }
    };

    let elapsed = started.elapsed().as_secs_f64();
    let outcome = match &result {
        Ok(()) => {
            info!(elapsed_secs = elapsed, "job completed");
            counter!("tracksync_jobs_completed_total", "job_type" => job_type.clone()).increment(1);
            UnrecordedOutcome {
                job_id: job.id,
                repo_id: job.repo_id,
                error: None,
            }
        }
        Err(err) => {
            warn!(elapsed_secs = elapsed, error = %err, "job failed");
            counter!("tracksync_jobs_failed_total", "job_type" => job_type.clone()).increment(1);
            UnrecordedOutcome {
                job_id: job.id,
                repo_id: job.repo_id,
                error: Some(err.to_string()),
            }
        }
    };
    histogram!("tracksync_job_duration_seconds", "job_type" => job_type).record(elapsed);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match outcome.record(&store).await {
            Ok(()) => {
                release(&in_flight, job.repo_id);
                return;
            }
            Err(err) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                warn!(attempt, error = %err, "failed to record job outcome, retrying");
                sleep(OUTCOME_RETRY_BASE * 2u32.pow(attempt - 1)).await;
            }
            Err(err) => {
                error!(
                    attempts = attempt,
                    error = %err,
                    "failed to record job outcome; repository held until it is written"
                );
                counter!("tracksync_job_outcomes_deferred_total").increment(1);
                unrecorded
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(outcome);
                return;
            }
        }
    }
}

fn release(in_flight: &Mutex<HashSet<i64>>, repo_id: i64) {
    let remaining = {
        let mut set = in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&repo_id);
        set.len()
    };
    gauge!("tracksync_runner_in_flight").set(remaining as f64);
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
