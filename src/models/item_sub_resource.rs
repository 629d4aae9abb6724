//! ItemSubResource entity model
//!
//! Cached sub-resources (comments) of an item. The whole set for an item is
//! replaced on each successful enrichment.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "item_sub_resources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub external_id: i64,

    /// Owning item's external identifier
    pub item_external_id: i64,

    pub author: Option<String>,

    pub body: String,

    pub remote_created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemExternalId",
        to = "super::item::Column::ExternalId"
    )]
    Item,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
