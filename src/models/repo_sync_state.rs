//! RepoSyncState entity model
//!
//! Per-repository sync watermark. Written only by the sync handler after a
//! fully successful pass.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "repo_sync_states")]
pub struct Model {
    /// Repository identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub repo_id: i64,

    /// Start time of the last fully successful pass
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Forces the next pass to ignore the watermark and fetch everything
    pub needs_full_resync: bool,

    /// Timestamp when the row was last written
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
