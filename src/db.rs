//! Database pool setup.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

const CONNECT_ATTEMPTS: u32 = 5;

/// Connect to the configured database, retrying transient failures with
/// exponential backoff.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;

    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                tracing::info!(attempt, "connected to database");
                return Ok(conn);
            }
            Err(err) if attempt >= CONNECT_ATTEMPTS => {
                tracing::error!(attempts = attempt, error = %err, "giving up connecting to database");
                return Err(DatabaseError::ConnectionFailed { source: err }.into());
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "database connection attempt failed"
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Run `SELECT 1` against the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_database_url_is_rejected() {
        let config = AppConfig {
            database_url: String::new(),
            ..AppConfig::default()
        };

        let result = init_pool(&config).await;
        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn health_check_passes_on_sqlite_memory() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            ..AppConfig::default()
        };

        let db = init_pool(&config).await.unwrap();
        health_check(&db).await.unwrap();
    }
}
