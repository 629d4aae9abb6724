//! Partial unique indexes guarding the job queue:
//! at most one active job per job key, and at most one processing job per repository.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

const GUARDS: &[(&str, &str, &str)] = &[
    (
        "idx_jobs_active_job_key",
        "job_key",
        "status IN ('pending','processing')",
    ),
    (
        "idx_jobs_processing_repo",
        "repo_id",
        "status = 'processing'",
    ),
];

fn create_sql(backend: DatabaseBackend, name: &str, column: &str, predicate: &str) -> String {
    match backend {
        DatabaseBackend::Postgres => format!(
            "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_indexes\n        WHERE schemaname = current_schema()\n          AND indexname = '{name}'\n    ) THEN\n        CREATE UNIQUE INDEX {name}\n            ON jobs ({column})\n            WHERE {predicate};\n    END IF;\nEND\n$$;"
        ),
        _ => format!("CREATE UNIQUE INDEX IF NOT EXISTS {name} ON jobs ({column}) WHERE {predicate}"),
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        for (name, column, predicate) in GUARDS {
            manager
                .get_connection()
                .execute(Statement::from_string(
                    backend,
                    create_sql(backend, name, column, predicate),
                ))
                .await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        for (name, _, _) in GUARDS {
            manager
                .get_connection()
                .execute(Statement::from_string(
                    backend,
                    format!("DROP INDEX IF EXISTS {name}"),
                ))
                .await?;
        }
        Ok(())
    }
}
