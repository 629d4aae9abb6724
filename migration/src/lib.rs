//! Database migrations for the tracksync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_jobs;
mod m2026_10_01_000002_add_job_active_key_guard;
mod m2026_10_01_000003_create_repo_sync_states;
mod m2026_10_01_000004_create_items;
mod m2026_10_01_000005_create_item_sub_resources;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_jobs::Migration),
            Box::new(m2026_10_01_000002_add_job_active_key_guard::Migration),
            Box::new(m2026_10_01_000003_create_repo_sync_states::Migration),
            Box::new(m2026_10_01_000004_create_items::Migration),
            Box::new(m2026_10_01_000005_create_item_sub_resources::Migration),
        ]
    }
}
