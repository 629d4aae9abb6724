//! Item entity model
//!
//! Issue or pull request mirrored from the remote tracker. Rows are written by
//! idempotent upsert keyed on `external_id`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "items")]
pub struct Model {
    /// Stable identifier assigned by the remote tracker (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub external_id: i64,

    /// Repository the item belongs to
    pub repo_id: i64,

    /// Repository-scoped item number
    pub number: i32,

    /// `issue` or `pull_request`
    pub kind: String,

    pub title: String,

    /// Remote state (`open` or `closed`)
    pub state: String,

    pub author: Option<String>,

    pub remote_created_at: DateTimeWithTimeZone,

    /// Last update time reported by the remote tracker
    pub remote_updated_at: DateTimeWithTimeZone,

    pub closed_at: Option<DateTimeWithTimeZone>,

    /// Set only after the item's sub-resources were fetched and cached
    pub sub_resource_fetched: bool,

    /// Local time of the last upsert
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::item_sub_resource::Entity")]
    SubResources,
}

impl Related<super::item_sub_resource::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubResources.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
