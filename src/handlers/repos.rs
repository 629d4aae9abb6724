//! # Repository Status Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::handlers::jobs::JobInfo;
use crate::server::AppState;

/// Sync status of one repository
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RepoStatusResponse {
    pub repo_id: i64,
    /// Job currently processing, else the next pending one
    pub current_job: Option<JobInfo>,
    /// Most recently finished job, with its error if it failed
    pub last_job: Option<JobInfo>,
    /// Start time of the last fully successful pass
    #[schema(example = "2026-01-15T10:30:00+00:00")]
    pub last_synced_at: Option<String>,
    pub needs_full_resync: bool,
}

#[utoipa::path(
    get,
    path = "/repos/{repo_id}/status",
    params(
        ("repo_id" = i64, Path, description = "Repository id")
    ),
    responses(
        (status = 200, description = "Repository sync status", body = RepoStatusResponse),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "repos"
)]
pub async fn repo_status(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
) -> Result<Json<RepoStatusResponse>, ApiError> {
    let current_job = state.jobs.current_job(repo_id).await?;
    let last_job = state.jobs.last_finished_job(repo_id).await?;
    let sync_state = state.sync_states.load(repo_id).await?;

    Ok(Json(RepoStatusResponse {
        repo_id,
        current_job: current_job.map(JobInfo::from),
        last_job: last_job.map(JobInfo::from),
        last_synced_at: sync_state
            .as_ref()
            .and_then(|s| s.last_synced_at)
            .map(|at| at.to_rfc3339()),
        needs_full_resync: sync_state.is_some_and(|s| s.needs_full_resync),
    }))
}

/// Flag the repository so its next pass ignores the watermark
#[utoipa::path(
    post,
    path = "/repos/{repo_id}/resync",
    params(
        ("repo_id" = i64, Path, description = "Repository id")
    ),
    responses(
        (status = 204, description = "Full resync requested"),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "repos"
)]
pub async fn request_full_resync(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.sync_states.request_full_resync(repo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
