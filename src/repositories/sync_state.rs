//! Per-repository sync watermarks.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, Set};
use tracing::info;

use crate::models::repo_sync_state::{ActiveModel, Column, Entity, Model};

#[derive(Clone)]
pub struct SyncStateRepository {
    db: DatabaseConnection,
}

impl SyncStateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn load(&self, repo_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(repo_id).one(&self.db).await
    }

    /// Advance the watermark to `pass_started_at`.
    ///
    /// The full-resync flag is cleared only by a pass that ran as a full
    /// resync, so a request raised during an incremental pass survives it.
    pub async fn commit_watermark(
        &self,
        repo_id: i64,
        pass_started_at: DateTime<Utc>,
        was_full_resync: bool,
    ) -> Result<(), DbErr> {
        let row = ActiveModel {
            repo_id: Set(repo_id),
            last_synced_at: Set(Some(pass_started_at.fixed_offset())),
            needs_full_resync: Set(false),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        let mut update_columns = vec![Column::LastSyncedAt, Column::UpdatedAt];
        if was_full_resync {
            update_columns.push(Column::NeedsFullResync);
        }

        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::RepoId)
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        info!(repo_id, watermark = %pass_started_at, was_full_resync, "sync watermark committed");
        Ok(())
    }

    /// Force the next pass for `repo_id` to ignore its watermark.
    pub async fn request_full_resync(&self, repo_id: i64) -> Result<(), DbErr> {
        let row = ActiveModel {
            repo_id: Set(repo_id),
            last_synced_at: Set(None),
            needs_full_resync: Set(true),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::RepoId)
                    .update_columns([Column::NeedsFullResync, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        info!(repo_id, "full resync requested");
        Ok(())
    }
}
