use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::models::job::Model as Job;
use crate::remote::{CallOutcome, FailureClass, RateAwareCaller, RemoteError, RepoRef};
use crate::repositories::{ItemRepository, JobStore, NewJob, SyncStateRepository, UpsertKind};
use crate::runner::{JobError, JobHandler};

use super::{SYNC_JOB_TYPE, SyncArguments, SyncError, SyncPhase, SyncReport};

/// Executes `sync_items` jobs.
///
/// Assumes exclusive ownership of the repository's watermark for the length
/// of a pass; the job store guarantees no concurrent pass for the same repo.
pub struct SyncHandler {
    caller: Arc<RateAwareCaller>,
    items: ItemRepository,
    states: SyncStateRepository,
    jobs: JobStore,
    config: SyncConfig,
}

struct PendingEnrichment {
    external_id: i64,
    number: i32,
}

impl SyncHandler {
    pub fn new(
        caller: Arc<RateAwareCaller>,
        items: ItemRepository,
        states: SyncStateRepository,
        jobs: JobStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            caller,
            items,
            states,
            jobs,
            config,
        }
    }

    /// Run one full pass for `repo`.
    #[instrument(skip_all, fields(repo_id = repo.repo_id, repo = %repo.full_name()))]
    pub async fn run_pass(&self, repo: &RepoRef) -> Result<SyncReport, SyncError> {
        let pass_started_at = Utc::now();
        let timer = std::time::Instant::now();

        let result = self.execute_pass(repo, pass_started_at).await;

        histogram!("tracksync_sync_pass_duration_seconds").record(timer.elapsed().as_secs_f64());
        match &result {
            Ok(report) => {
                counter!("tracksync_sync_passes_total", "outcome" => "committed").increment(1);
                info!(
                    pages = report.pages,
                    inserted = report.inserted,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    enriched = report.enriched,
                    enrichment_failures = report.enrichment_failures,
                    backfilled = report.backfilled,
                    full_resync = report.full_resync,
                    "sync pass committed"
                );
            }
            Err(err) => {
                counter!("tracksync_sync_passes_total", "outcome" => "aborted").increment(1);
                warn!(phase = %SyncPhase::Aborted, error = %err, "sync pass aborted, watermark unchanged");
            }
        }
        result
    }

    async fn execute_pass(
        &self,
        repo: &RepoRef,
        pass_started_at: chrono::DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        debug!(phase = %SyncPhase::Initializing, "loading watermark");
        let state = self.states.load(repo.repo_id).await?;
        report.full_resync = state.as_ref().is_some_and(|s| s.needs_full_resync);
        let since = if report.full_resync {
            None
        } else {
            state
                .as_ref()
                .and_then(|s| s.last_synced_at)
                .map(|at| at.with_timezone(&Utc) - self.config.clock_skew_buffer())
        };
        info!(
            phase = %SyncPhase::Initializing,
            since = ?since,
            full_resync = report.full_resync,
            "starting sync pass"
        );

        let mut cursor: Option<String> = None;

        loop {
            let page = match self
                .caller
                .fetch_page(repo, cursor.as_deref(), since)
                .await
            {
                CallOutcome::Ok(page) => page,
                CallOutcome::Retryable { class, error } => {
                    return Err(abort(SyncPhase::Paging, class, error));
                }
                CallOutcome::Fatal(error) => {
                    return Err(abort(SyncPhase::Paging, FailureClass::Fatal, error));
                }
            };
            report.pages += 1;

            let mut to_enrich = Vec::new();
            for item in &page.items {
                let outcome = self.items.upsert(repo.repo_id, item).await?;
                counter!("tracksync_items_upserted_total", "kind" => outcome.kind.as_str())
                    .increment(1);
                match outcome.kind {
                    UpsertKind::Inserted => report.inserted += 1,
                    UpsertKind::Updated => report.updated += 1,
                    UpsertKind::Unchanged => report.unchanged += 1,
                }
                if outcome.needs_enrichment {
                    to_enrich.push(PendingEnrichment {
                        external_id: item.external_id,
                        number: item.number,
                    });
                }
            }
            debug!(
                phase = %SyncPhase::Paging,
                page = report.pages,
                items = page.items.len(),
                "page upserted"
            );

            for pending in to_enrich {
                self.enrich(repo, &pending, &mut report).await?;
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        if self.config.backfill_limit > 0 {
            let stale = self
                .items
                .unenriched(repo.repo_id, pass_started_at, self.config.backfill_limit)
                .await?;
            if !stale.is_empty() {
                debug!(
                    phase = %SyncPhase::PerItemEnrichment,
                    count = stale.len(),
                    "retrying enrichment for unenriched items"
                );
            }
            for item in stale {
                let pending = PendingEnrichment {
                    external_id: item.external_id,
                    number: item.number,
                };
                if self.enrich(repo, &pending, &mut report).await? {
                    report.backfilled += 1;
                }
            }
        }

        debug!(phase = %SyncPhase::Committing, watermark = %pass_started_at, "committing watermark");
        self.states
            .commit_watermark(repo.repo_id, pass_started_at, report.full_resync)
            .await?;
        report.watermark = Some(pass_started_at);

        Ok(report)
    }

    /// Fetch and cache one item's sub-resources.
    ///
    /// Returns whether the item is now enriched. Throttling aborts the pass;
    /// any other failure leaves the flag unset for a later pass.
    async fn enrich(
        &self,
        repo: &RepoRef,
        pending: &PendingEnrichment,
        report: &mut SyncReport,
    ) -> Result<bool, SyncError> {
        match self.caller.fetch_subresource(repo, pending.number).await {
            CallOutcome::Ok(sub_items) => {
                self.items
                    .replace_sub_resources(pending.external_id, &sub_items)
                    .await?;
                report.enriched += 1;
                Ok(true)
            }
            CallOutcome::Retryable { class, error } if class.is_rate_limit() => {
                Err(abort(SyncPhase::PerItemEnrichment, class, error))
            }
            CallOutcome::Retryable { error, .. } | CallOutcome::Fatal(error) => {
                report.enrichment_failures += 1;
                counter!("tracksync_enrichment_failures_total", "class" => error.class().as_str())
                    .increment(1);
                warn!(
                    phase = %SyncPhase::PerItemEnrichment,
                    item_external_id = pending.external_id,
                    item_number = pending.number,
                    error = %error,
                    "enrichment failed; item left for a later pass"
                );
                Ok(false)
            }
        }
    }

    async fn enqueue_follow_on(&self, job: &Job, args: &SyncArguments) {
        let Some(job_type) = &self.config.follow_on_job_type else {
            return;
        };

        let new_job = NewJob {
            job_type: job_type.clone(),
            repo_id: job.repo_id,
            user_id: job.user_id,
            arguments: args.to_json(),
            priority: self.config.follow_on_priority,
        };
        match self.jobs.enqueue(new_job).await {
            Ok(outcome) => debug!(
                follow_on_job_id = %outcome.job.id,
                created = outcome.created,
                "follow-on job enqueued"
            ),
            Err(err) => warn!(error = %err, "failed to enqueue follow-on job"),
        }
    }
}

fn abort(phase: SyncPhase, class: FailureClass, source: RemoteError) -> SyncError {
    SyncError::Aborted {
        phase,
        class,
        source,
    }
}

#[async_trait]
impl JobHandler for SyncHandler {
    fn job_type(&self) -> &'static str {
        SYNC_JOB_TYPE
    }

    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let args = SyncArguments::parse(&job.arguments)?;
        let repo = RepoRef {
            repo_id: job.repo_id,
            owner: args.owner.clone(),
            name: args.name.clone(),
        };

        self.run_pass(&repo).await?;
        self.enqueue_follow_on(job, &args).await;
        Ok(())
    }
}
