//! # Tracksync Entry Point
//!
//! `serve` (the default) migrates, reaps orphaned jobs, then runs the job
//! runner alongside the HTTP API until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tracksync::config::{AppConfig, ConfigLoader};
use tracksync::migration::{Migrator, MigratorTrait};
use tracksync::remote::{CooldownPolicy, GitHubClient, RateAwareCaller, RateLimitState};
use tracksync::repositories::{ItemRepository, JobStore, SyncStateRepository};
use tracksync::runner::{HandlerRegistry, JobRunner};
use tracksync::server::{AppState, run_server};
use tracksync::sync::SyncHandler;
use tracksync::{db, telemetry};

#[derive(Parser, Debug)]
#[command(version, about = "Background job runner and resumable repository sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the job runner and HTTP API
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Fail jobs left processing by a previous process and exit
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    info!(profile = %config.profile, "loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        info!(config = %redacted, "effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            info!("migrations applied");
        }
        Command::Reap => {
            let reaped = JobStore::new(db.clone())
                .reap_orphans()
                .await
                .context("reaping orphaned jobs")?;
            info!(reaped, "orphaned jobs failed");
        }
        Command::Serve => serve(config, db).await?,
    }

    Ok(())
}

async fn serve(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    Migrator::up(&db, None).await.context("applying migrations")?;

    let jobs = JobStore::new(db.clone());
    let reaped = jobs.reap_orphans().await.context("reaping orphaned jobs")?;
    if reaped > 0 {
        info!(reaped, "failed jobs orphaned by previous process");
    }

    let github = GitHubClient::new(
        config.github_api_base.clone(),
        config.github_token.clone(),
        config.sync.per_page,
    )
    .context("building GitHub client")?;
    let rate_limit = Arc::new(RateLimitState::new(CooldownPolicy::from(
        &config.rate_limit_policy,
    )));
    let caller = Arc::new(RateAwareCaller::new(
        Arc::new(github),
        config.rate_limit_policy.clone(),
        Arc::clone(&rate_limit),
    ));

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SyncHandler::new(
        caller,
        ItemRepository::new(db.clone()),
        SyncStateRepository::new(db.clone()),
        jobs.clone(),
        config.sync.clone(),
    )));

    let runner = JobRunner::new(
        jobs,
        Arc::new(registry),
        rate_limit,
        config.runner.clone(),
    );

    let shutdown = CancellationToken::new();
    let runner_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        });
    }

    let state = AppState::new(Arc::new(config), db);
    let served = run_server(state, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(err) = runner_handle.await {
        error!(error = %err, "job runner task failed");
    }
    info!("shutdown complete");

    served
}
