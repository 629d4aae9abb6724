//! # Server Configuration
//!
//! Router, shared state, and the OpenAPI document for the tracksync API.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::telemetry::{self, TraceContext};
use crate::repositories::{JobStore, SyncStateRepository};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub jobs: JobStore,
    pub sync_states: SyncStateRepository,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        Self {
            jobs: JobStore::new(db.clone()),
            sync_states: SyncStateRepository::new(db.clone()),
            config,
            db,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/jobs", post(handlers::jobs::enqueue_job))
        .route("/jobs/queue", get(handlers::jobs::queue_depth))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/repos/{repo_id}/status", get(handlers::repos::repo_status))
        .route(
            "/repos/{repo_id}/resync",
            post(handlers::repos::request_full_resync),
        )
        .with_state(state)
        .layer(middleware::from_fn(trace_context))
        .layer(TraceLayer::new_for_http())
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Scope each request under a correlation id, taken from `x-request-id` when present.
async fn trace_context(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok());
    let context = TraceContext::from_request_id(request_id);

    telemetry::with_trace_context(context, next.run(request)).await
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::jobs::enqueue_job,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::queue_depth,
        crate::handlers::repos::repo_status,
        crate::handlers::repos::request_full_resync,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::jobs::EnqueueJobRequest,
            crate::handlers::jobs::EnqueueJobResponse,
            crate::handlers::jobs::JobInfo,
            crate::handlers::repos::RepoStatusResponse,
            crate::repositories::QueueDepth,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "jobs", description = "Durable job queue"),
        (name = "repos", description = "Repository sync state"),
    ),
    info(
        title = "Tracksync API",
        description = "Background job runner and resumable repository sync",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
