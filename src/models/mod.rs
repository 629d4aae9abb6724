//! # Data Models
//!
//! SeaORM entities for jobs, sync watermarks, and mirrored items.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod item;
pub mod item_sub_resource;
pub mod job;
pub mod repo_sync_state;

pub use item::Entity as Item;
pub use item_sub_resource::Entity as ItemSubResource;
pub use job::{Entity as Job, JobStatus};
pub use repo_sync_state::Entity as RepoSyncState;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "tracksync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
