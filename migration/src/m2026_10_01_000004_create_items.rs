//! Migration to create the items table.
//!
//! Items are issue/pull-request records mirrored from the remote tracker,
//! keyed by their stable external identifier.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Items::ExternalId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Items::RepoId).big_integer().not_null())
                    .col(ColumnDef::new(Items::Number).integer().not_null())
                    .col(ColumnDef::new(Items::Kind).text().not_null())
                    .col(ColumnDef::new(Items::Title).text().not_null())
                    .col(ColumnDef::new(Items::State).text().not_null())
                    .col(ColumnDef::new(Items::Author).text().null())
                    .col(
                        ColumnDef::new(Items::RemoteCreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Items::RemoteUpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Items::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Items::SubResourceFetched)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Items::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Backfill sweep looks up unenriched items per repository.
        manager
            .create_index(
                Index::create()
                    .name("idx_items_repo_sub_resource_fetched")
                    .table(Items::Table)
                    .col(Items::RepoId)
                    .col(Items::SubResourceFetched)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_items_repo_sub_resource_fetched")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Items {
    Table,
    ExternalId,
    RepoId,
    Number,
    Kind,
    Title,
    State,
    Author,
    RemoteCreatedAt,
    RemoteUpdatedAt,
    ClosedAt,
    SubResourceFetched,
    SyncedAt,
}
