//! Job entity model
//!
//! This module contains the SeaORM entity model for the jobs table, the durable
//! queue of work items claimed and executed by the runner.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Job entity representing one unit of background work against a repository
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Unique identifier for the job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Idempotency key derived from (job_type, repo_id, arguments)
    pub job_key: String,

    /// Handler type that executes this job (e.g. `sync_items`)
    pub job_type: String,

    /// Repository the job targets; at most one job per repository is processing
    pub repo_id: i64,

    /// User that submitted the job, if any
    pub user_id: Option<i64>,

    /// Handler-specific arguments
    #[sea_orm(column_type = "JsonBinary")]
    pub arguments: JsonValue,

    /// Lifecycle status (pending, processing, completed, failed)
    pub status: String,

    /// Claim priority (higher values are claimed first)
    pub priority: i16,

    /// Timestamp when the job was enqueued
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the runner claimed the job
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job reached a terminal status
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Human-readable failure reason for failed jobs
    pub last_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed lifecycle status; unknown values are treated as failed.
    pub fn status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Statuses that count toward the one-active-job-per-key invariant.
    pub fn active() -> [&'static str; 2] {
        [JobStatus::Pending.as_str(), JobStatus::Processing.as_str()]
    }

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
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}
