//! # API Handlers
//!
//! HTTP endpoints for enqueueing jobs and inspecting sync state.

pub mod jobs;
pub mod repos;

use crate::db;
use crate::error::{ApiError, ErrorType};
use crate::models::ServiceInfo;
use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use tracing::warn;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe that also checks the database connection
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 204, description = "Service and database are reachable"),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        warn!(error = %err, "health check failed");
        ApiError::from(ErrorType::ServiceUnavailable).with_retry_after(5)
    })?;
    Ok(StatusCode::NO_CONTENT)
}
