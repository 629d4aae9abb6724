//! Synced items and their cached sub-resources.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Select, Set, TransactionTrait,
};

use crate::models::item::{self, Entity as Item};
use crate::models::item_sub_resource::{self, Entity as ItemSubResource};
use crate::remote::{RemoteItem, RemoteSubItem};

/// How an upsert related to what was already stored. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertKind::Inserted => "inserted",
            UpsertKind::Updated => "updated",
            UpsertKind::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub kind: UpsertKind,
    /// Sub-resources must be (re)fetched: the item is new, changed, or was
    /// never enriched successfully.
    pub needs_enrichment: bool,
}

#[derive(Clone)]
pub struct ItemRepository {
    db: DatabaseConnection,
}

impl ItemRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert or update an item keyed by its external id.
    ///
    /// An update resets the enrichment flag; an unchanged row keeps it.
    pub async fn upsert(&self, repo_id: i64, remote: &RemoteItem) -> Result<UpsertOutcome, DbErr> {
        let existing = Item::find_by_id(remote.external_id).one(&self.db).await?;
        let remote_updated_at = remote.updated_at.fixed_offset();

        let (kind, needs_enrichment) = match &existing {
            None => (UpsertKind::Inserted, true),
            Some(stored)
                if stored.remote_updated_at < remote_updated_at || stored.state != remote.state =>
            {
                (UpsertKind::Updated, true)
            }
            Some(stored) => (UpsertKind::Unchanged, !stored.sub_resource_fetched),
        };

        let row = item::ActiveModel {
            external_id: Set(remote.external_id),
            repo_id: Set(repo_id),
            number: Set(remote.number),
            kind: Set(remote.kind.as_str().to_string()),
            title: Set(remote.title.clone()),
            state: Set(remote.state.clone()),
            author: Set(remote.author.clone()),
            remote_created_at: Set(remote.created_at.fixed_offset()),
            remote_updated_at: Set(remote_updated_at),
            closed_at: Set(remote.closed_at.map(|at| at.fixed_offset())),
            sub_resource_fetched: Set(false),
            synced_at: Set(Utc::now().fixed_offset()),
        };

        let mut update_columns = vec![
            item::Column::RepoId,
            item::Column::Number,
            item::Column::Kind,
            item::Column::Title,
            item::Column::State,
            item::Column::Author,
            item::Column::RemoteCreatedAt,
            item::Column::RemoteUpdatedAt,
            item::Column::ClosedAt,
            item::Column::SyncedAt,
        ];
        if kind == UpsertKind::Updated {
            update_columns.push(item::Column::SubResourceFetched);
        }

        Item::insert(row)
            .on_conflict(
                OnConflict::column(item::Column::ExternalId)
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(UpsertOutcome {
            kind,
            needs_enrichment,
        })
    }

    /// Replace the cached sub-resource set of one item and mark it enriched.
    pub async fn replace_sub_resources(
        &self,
        item_external_id: i64,
        sub_items: &[RemoteSubItem],
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        ItemSubResource::delete_many()
            .filter(item_sub_resource::Column::ItemExternalId.eq(item_external_id))
            .exec(&txn)
            .await?;

        if !sub_items.is_empty() {
            let rows = sub_items.iter().map(|sub| item_sub_resource::ActiveModel {
                external_id: Set(sub.external_id),
                item_external_id: Set(item_external_id),
                author: Set(sub.author.clone()),
                body: Set(sub.body.clone()),
                remote_created_at: Set(sub.created_at.fixed_offset()),
            });
            ItemSubResource::insert_many(rows)
                .on_conflict(
                    OnConflict::column(item_sub_resource::Column::ExternalId)
                        .update_columns([
                            item_sub_resource::Column::ItemExternalId,
                            item_sub_resource::Column::Author,
                            item_sub_resource::Column::Body,
                            item_sub_resource::Column::RemoteCreatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        Item::update_many()
            .col_expr(
                item::Column::SubResourceFetched,
                sea_orm::prelude::Expr::value(true),
            )
            .filter(item::Column::ExternalId.eq(item_external_id))
            .exec(&txn)
            .await?;

        txn.commit().await
    }

    /// Stored items of `repo_id` never enriched successfully and last upserted
    /// before `synced_before`, oldest update first.
    ///
    /// Passing the start of a pass leaves out every item that pass upserted.
    pub async fn unenriched(
        &self,
        repo_id: i64,
        synced_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<item::Model>, DbErr> {
        unenriched_query(repo_id, synced_before, limit)
            .all(&self.db)
            .await
    }

    pub async fn find(&self, external_id: i64) -> Result<Option<item::Model>, DbErr> {
        Item::find_by_id(external_id).one(&self.db).await
    }

    pub async fn list_for_repo(&self, repo_id: i64) -> Result<Vec<item::Model>, DbErr> {
        Item::find()
            .filter(item::Column::RepoId.eq(repo_id))
            .order_by_asc(item::Column::Number)
            .all(&self.db)
            .await
    }

    pub async fn sub_resources(
        &self,
        item_external_id: i64,
    ) -> Result<Vec<item_sub_resource::Model>, DbErr> {
        ItemSubResource::find()
            .filter(item_sub_resource::Column::ItemExternalId.eq(item_external_id))
            .order_by_asc(item_sub_resource::Column::RemoteCreatedAt)
            .all(&self.db)
            .await
    }
}

fn unenriched_query(repo_id: i64, synced_before: DateTime<Utc>, limit: u64) -> Select<Item> {
    Item::find()
        .filter(item::Column::RepoId.eq(repo_id))
        .filter(item::Column::SubResourceFetched.eq(false))
        .filter(item::Column::SyncedAt.lt(synced_before.fixed_offset()))
        .order_by_asc(item::Column::RemoteUpdatedAt)
        .limit(limit)
}
