//! Migration to create the repo_sync_states table holding per-repository watermarks.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RepoSyncStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RepoSyncStates::RepoId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::NeedsFullResync)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RepoSyncStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RepoSyncStates {
    Table,
    RepoId,
    LastSyncedAt,
    NeedsFullResync,
    UpdatedAt,
}
