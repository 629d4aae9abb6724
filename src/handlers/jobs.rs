//! # Jobs API Handlers
//!
//! Enqueue jobs, look them up, and report queue depth.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, not_found, validation_error};
use crate::models::job;
use crate::repositories::{NewJob, QueueDepth};
use crate::runner::JobError;
use crate::server::AppState;
use crate::sync::{SYNC_JOB_TYPE, SyncArguments};

/// Request body for enqueueing a job
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueJobRequest {
    /// Handler type to run
    #[schema(example = "sync_items")]
    pub job_type: String,
    /// Repository the job targets
    #[schema(example = 1296269)]
    pub repo_id: i64,
    /// Submitting user, if any
    pub user_id: Option<i64>,
    /// Handler-specific arguments
    #[serde(default = "empty_arguments")]
    #[schema(example = json!({"owner": "octocat", "name": "Hello-World"}))]
    pub arguments: JsonValue,
    /// Claim priority (higher first, default 0)
    #[serde(default)]
    pub priority: i16,
}

fn empty_arguments() -> JsonValue {
    JsonValue::Object(Default::default())
}

/// Response for an enqueue request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueJobResponse {
    pub job_id: Uuid,
    #[schema(example = "pending")]
    pub status: String,
    /// False when an equivalent pending or processing job already existed
    pub created: bool,
}

/// Job record
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    pub id: Uuid,
    #[schema(example = "sync_items")]
    pub job_type: String,
    pub repo_id: i64,
    pub user_id: Option<i64>,
    pub arguments: JsonValue,
    #[schema(example = "completed")]
    pub status: String,
    pub priority: i16,
    #[schema(example = "2026-01-15T10:30:00+00:00")]
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Failure reason for failed jobs
    pub last_error: Option<String>,
}

impl From<job::Model> for JobInfo {
    fn from(model: job::Model) -> Self {
        Self {
            id: model.id,
            job_type: model.job_type,
            repo_id: model.repo_id,
            user_id: model.user_id,
            arguments: model.arguments,
            status: model.status,
            priority: model.priority,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
            last_error: model.last_error,
        }
    }
}

/// Enqueue a job; duplicates resolve to the existing active job
#[utoipa::path(
    post,
    path = "/jobs",
    request_body = EnqueueJobRequest,
    responses(
        (status = 202, description = "Job enqueued", body = EnqueueJobResponse),
        (status = 200, description = "Equivalent job already pending or processing", body = EnqueueJobResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn enqueue_job(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueJobResponse>), ApiError> {
    let Json(request) = payload?;

    if request.job_type.trim().is_empty() {
        return Err(validation_error(
            "Invalid job",
            serde_json::json!({ "job_type": "required" }),
        ));
    }
    if request.repo_id <= 0 {
        return Err(validation_error(
            "Invalid job",
            serde_json::json!({ "repo_id": "must be positive" }),
        ));
    }
    if request.job_type == SYNC_JOB_TYPE
        && let Err(JobError::InvalidArguments(reason)) = SyncArguments::parse(&request.arguments)
    {
        return Err(validation_error(
            "Invalid job arguments",
            serde_json::json!({ "arguments": reason }),
        ));
    }

    let outcome = state
        .jobs
        .enqueue(NewJob {
            job_type: request.job_type,
            repo_id: request.repo_id,
            user_id: request.user_id,
            arguments: request.arguments,
            priority: request.priority,
        })
        .await?;

    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(EnqueueJobResponse {
            job_id: outcome.job.id,
            status: outcome.job.status,
            created: outcome.created,
        }),
    ))
}

/// Fetch one job
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job id")
    ),
    responses(
        (status = 200, description = "Job record", body = JobInfo),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state
        .jobs
        .find(id)
        .await?
        .ok_or_else(|| not_found("Job not found"))?;

    Ok(Json(job.into()))
}

/// Pending and processing job counts
#[utoipa::path(
    get,
    path = "/jobs/queue",
    responses(
        (status = 200, description = "Queue depth", body = QueueDepth),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn queue_depth(State(state): State<AppState>) -> Result<Json<QueueDepth>, ApiError> {
    Ok(Json(state.jobs.queue_depth().await?))
}
