//! Migration to create the jobs table.
//!
//! Jobs are durable work items claimed by the runner. Each row carries its
//! idempotency key, target repository, arguments, lifecycle status and timing.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Jobs::JobKey).text().not_null())
                    .col(ColumnDef::new(Jobs::JobType).text().not_null())
                    .col(ColumnDef::new(Jobs::RepoId).big_integer().not_null())
                    .col(ColumnDef::new(Jobs::UserId).big_integer().null())
                    .col(ColumnDef::new(Jobs::Arguments).json_binary().not_null())
                    .col(
                        ColumnDef::new(Jobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Jobs::Priority)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Jobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Jobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Jobs::LastError).text().null())
                    .to_owned(),
            )
            .await?;

        // Claim order: highest priority first, oldest first within a priority.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_jobs_status_priority_created ON jobs (status, priority DESC, created_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_repo_status")
                    .table(Jobs::Table)
                    .col(Jobs::RepoId)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_jobs_status_priority_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_jobs_repo_status").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    JobKey,
    JobType,
    RepoId,
    UserId,
    Arguments,
    Status,
    Priority,
    CreatedAt,
    StartedAt,
    CompletedAt,
    LastError,
}
