//! # Job Store
//!
//! Durable queue of work items. Enqueue is idempotent per job key, claiming is
//! atomic and honours per-repository exclusivity, and terminal transitions are
//! only ever applied to jobs currently `processing`.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::job::{ActiveModel, Column, Entity, JobStatus, Model};

pub const ORPHANED_ERROR: &str = "orphaned by process restart";

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbErr,
    },
}

fn map_db_err(context: &'static str) -> impl FnOnce(DbErr) -> JobStoreError {
    move |source| JobStoreError::Database { context, source }
}

/// Submission for [`JobStore::enqueue`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub repo_id: i64,
    pub user_id: Option<i64>,
    pub arguments: JsonValue,
    pub priority: i16,
}

#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub job: Model,
    /// False when an equivalent active job already existed.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct QueueDepth {
    pub pending: u64,
    pub processing: u64,
}

/// Idempotency key for `(job_type, repo_id, arguments)`.
///
/// Object keys are sorted before hashing so equal arguments always collide.
pub fn job_key(job_type: &str, repo_id: i64, arguments: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_bytes());
    hasher.update(b"|");
    hasher.update(repo_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(arguments).as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        JsonValue::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        JsonValue::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Clone)]
pub struct JobStore {
    db: DatabaseConnection,
}

impl JobStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a pending job, or return the active job with the same key.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<EnqueueOutcome, JobStoreError> {
        if new_job.job_type.trim().is_empty() {
            return Err(JobStoreError::InvalidJob("job type is required".into()));
        }

        let key = job_key(&new_job.job_type, new_job.repo_id, &new_job.arguments);

        // A concurrent enqueue may win the insert or finish the job between
        // our lookup and insert; one more round settles either case.
        for _ in 0..2 {
            if let Some(existing) = self.find_active_by_key(&key).await? {
                debug!(job_id = %existing.id, job_key = %key, "duplicate enqueue resolved to active job");
                counter!("tracksync_jobs_enqueue_deduplicated_total").increment(1);
                return Ok(EnqueueOutcome {
                    job: existing,
                    created: false,
                });
            }

            let job = ActiveModel {
                id: Set(Uuid::new_v4()),
                job_key: Set(key.clone()),
                job_type: Set(new_job.job_type.clone()),
                repo_id: Set(new_job.repo_id),
                user_id: Set(new_job.user_id),
                arguments: Set(new_job.arguments.clone()),
                status: Set(JobStatus::Pending.as_str().to_string()),
                priority: Set(new_job.priority),
                created_at: Set(Utc::now().fixed_offset()),
                started_at: Set(None),
                completed_at: Set(None),
                last_error: Set(None),
            };

            match job.insert(&self.db).await {
                Ok(job) => {
                    info!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        repo_id = job.repo_id,
                        priority = job.priority,
                        "job enqueued"
                    );
                    counter!("tracksync_jobs_enqueued_total", "job_type" => job.job_type.clone())
                        .increment(1);
                    return Ok(EnqueueOutcome { job, created: true });
                }
                Err(err) if is_unique_violation(&err) => continue,
                Err(err) => return Err(map_db_err("failed to insert job")(err)),
            }
        }

        self.find_active_by_key(&key)
            .await?
            .map(|job| EnqueueOutcome {
                job,
                created: false,
            })
            .ok_or_else(|| {
                JobStoreError::InvalidJob("job key contended by concurrent submissions".into())
            })
    }

    /// Atomically claim the best pending job whose repository is neither in
    /// `excluded` nor already processing.
    ///
    /// Ordering is priority descending, then oldest first.
    pub async fn claim_next(&self, excluded: &HashSet<i64>) -> Result<Option<Model>, JobStoreError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(map_db_err("failed to start claim transaction"))?;

        let busy_repos = Entity::find()
            .select_only()
            .column(Column::RepoId)
            .filter(Column::Status.eq(JobStatus::Processing.as_str()))
            .into_query();

        let mut query = Entity::find()
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .filter(Column::RepoId.not_in_subquery(busy_repos));
        if !excluded.is_empty() {
            query = query.filter(Column::RepoId.is_not_in(excluded.iter().copied()));
        }

        let candidate = query
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await
            .map_err(map_db_err("failed to select claimable job"))?;

        let Some(candidate) = candidate else {
            txn.commit()
                .await
                .map_err(map_db_err("failed to commit claim transaction"))?;
            return Ok(None);
        };

        let now = Utc::now().fixed_offset();
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Processing.as_str()))
            .col_expr(Column::StartedAt, Expr::value(now))
            .filter(Column::Id.eq(candidate.id))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .exec(&txn)
            .await;

        let rows_affected = match update {
            Ok(result) => result.rows_affected,
            // Another claimer took a job for this repository first.
            Err(err) if is_unique_violation(&err) => 0,
            Err(err) => return Err(map_db_err("failed to claim job")(err)),
        };

        if rows_affected == 0 {
            txn.rollback()
                .await
                .map_err(map_db_err("failed to roll back claim transaction"))?;
            debug!(job_id = %candidate.id, "lost claim race");
            return Ok(None);
        }

        let claimed = Entity::find_by_id(candidate.id)
            .one(&txn)
            .await
            .map_err(map_db_err("failed to reload claimed job"))?;

        txn.commit()
            .await
            .map_err(map_db_err("failed to commit claim transaction"))?;

        if let Some(job) = &claimed {
            counter!("tracksync_jobs_claimed_total", "job_type" => job.job_type.clone())
                .increment(1);
        }
        Ok(claimed)
    }

    /// `processing -> completed`. Returns false if the job was not processing.
    pub async fn mark_completed(&self, id: Uuid) -> Result<bool, JobStoreError> {
        self.finish(id, JobStatus::Completed, None).await
    }

    /// `processing -> failed`, recording `error`. Failed jobs are never requeued here.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, JobStoreError> {
        self.finish(id, JobStatus::Failed, Some(error.to_string()))
            .await
    }

    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        last_error: Option<String>,
    ) -> Result<bool, JobStoreError> {
        debug_assert!(status.is_terminal());
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(Utc::now().fixed_offset()))
            .col_expr(Column::LastError, Expr::value(last_error))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(JobStatus::Processing.as_str()))
            .exec(&self.db)
            .await
            .map_err(map_db_err("failed to record job outcome"))?;

        if result.rows_affected == 0 {
            warn!(job_id = %id, status = %status, "job was not processing; outcome ignored");
            return Ok(false);
        }
        Ok(true)
    }

    /// Fail every job left `processing` by a dead process. Run once at startup,
    /// before the runner claims anything.
    pub async fn reap_orphans(&self) -> Result<u64, JobStoreError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(Utc::now().fixed_offset()))
            .col_expr(Column::LastError, Expr::value(ORPHANED_ERROR))
            .filter(Column::Status.eq(JobStatus::Processing.as_str()))
            .exec(&self.db)
            .await
            .map_err(map_db_err("failed to reap orphaned jobs"))?;

        if result.rows_affected > 0 {
            warn!(count = result.rows_affected, "reaped orphaned jobs");
            counter!("tracksync_jobs_orphaned_total").increment(result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    /// Delete terminal jobs that finished more than `retention` ago.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64, JobStoreError> {
        let cutoff = (Utc::now() - retention).fixed_offset();
        let result = Entity::delete_many()
            .filter(Column::Status.is_in([
                JobStatus::Completed.as_str(),
                JobStatus::Failed.as_str(),
            ]))
            .filter(Column::CompletedAt.lt(cutoff))
            .exec(&self.db)
            .await
            .map_err(map_db_err("failed to purge expired jobs"))?;

        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "purged expired jobs");
        }
        Ok(result.rows_affected)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>, JobStoreError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err("failed to load job"))
    }

    async fn find_active_by_key(&self, key: &str) -> Result<Option<Model>, JobStoreError> {
        Entity::find()
            .filter(Column::JobKey.eq(key))
            .filter(Column::Status.is_in(JobStatus::active()))
            .one(&self.db)
            .await
            .map_err(map_db_err("failed to look up job by key"))
    }

    /// Repositories with a job currently processing.
    pub async fn processing_repo_ids(&self) -> Result<HashSet<i64>, JobStoreError> {
        let ids: Vec<i64> = Entity::find()
            .select_only()
            .column(Column::RepoId)
            .filter(Column::Status.eq(JobStatus::Processing.as_str()))
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(map_db_err("failed to load processing repositories"))?;
        Ok(ids.into_iter().collect())
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth, JobStoreError> {
        let count = |status: JobStatus| {
            Entity::find()
                .filter(Column::Status.eq(status.as_str()))
                .count(&self.db)
        };

        let pending = count(JobStatus::Pending)
            .await
            .map_err(map_db_err("failed to count pending jobs"))?;
        let processing = count(JobStatus::Processing)
            .await
            .map_err(map_db_err("failed to count processing jobs"))?;

        Ok(QueueDepth {
            pending,
            processing,
        })
    }

    /// The active job for `repo_id` (processing before pending), if any.
    pub async fn current_job(&self, repo_id: i64) -> Result<Option<Model>, JobStoreError> {
        let jobs = Entity::find()
            .filter(Column::RepoId.eq(repo_id))
            .filter(Column::Status.is_in(JobStatus::active()))
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(map_db_err("failed to load active jobs"))?;

        let processing = jobs
            .iter()
            .position(|job| job.status() == JobStatus::Processing);
        Ok(match processing {
            Some(idx) => jobs.into_iter().nth(idx),
            None => jobs.into_iter().next(),
        })
    }

    /// Most recently finished job for `repo_id`.
    pub async fn last_finished_job(&self, repo_id: i64) -> Result<Option<Model>, JobStoreError> {
        Entity::find()
            .filter(Column::RepoId.eq(repo_id))
            .filter(Column::Status.is_in([
                JobStatus::Completed.as_str(),
                JobStatus::Failed.as_str(),
            ]))
            .order_by_desc(Column::CompletedAt)
            .one(&self.db)
            .await
            .map_err(map_db_err("failed to load last finished job"))
    }
}
