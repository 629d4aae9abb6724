//! Migration to create the item_sub_resources table (cached comments per item).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ItemSubResources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ItemSubResources::ExternalId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ItemSubResources::ItemExternalId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ItemSubResources::Author).text().null())
                    .col(ColumnDef::new(ItemSubResources::Body).text().not_null())
                    .col(
                        ColumnDef::new(ItemSubResources::RemoteCreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_item_sub_resources_item")
                            .from(ItemSubResources::Table, ItemSubResources::ItemExternalId)
                            .to(Items::Table, Items::ExternalId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_item_sub_resources_item")
                    .table(ItemSubResources::Table)
                    .col(ItemSubResources::ItemExternalId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_item_sub_resources_item")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ItemSubResources::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ItemSubResources {
    Table,
    ExternalId,
    ItemExternalId,
    Author,
    Body,
    RemoteCreatedAt,
}

#[derive(DeriveIden)]
enum Items {
    Table,
    ExternalId,
}
