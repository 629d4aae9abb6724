//! # Resumable Sync
//!
//! Incremental mirror of a repository's items. A pass pages through items
//! updated since the stored watermark, upserts each page as it arrives,
//! enriches items whose sub-resources are stale, and only then advances the
//! watermark to the time the pass started. Any aborting error leaves the
//! watermark where it was, so the next pass re-covers the same window.

mod handler;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::{FailureClass, RemoteError};
use crate::runner::JobError;

pub use handler::SyncHandler;

/// Job type executed by [`SyncHandler`].
pub const SYNC_JOB_TYPE: &str = "sync_items";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Initializing,
    Paging,
    PerItemEnrichment,
    Committing,
    Aborted,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Initializing => "initializing",
            SyncPhase::Paging => "paging",
            SyncPhase::PerItemEnrichment => "per_item_enrichment",
            SyncPhase::Committing => "committing",
            SyncPhase::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync aborted during {phase} ({class_name}): {source}", class_name = .class.as_str())]
    Aborted {
        phase: SyncPhase,
        class: FailureClass,
        #[source]
        source: RemoteError,
    },
    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
}

impl From<SyncError> for JobError {
    fn from(error: SyncError) -> Self {
        JobError::Failed(error.to_string())
    }
}

/// Arguments of a `sync_items` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncArguments {
    pub owner: String,
    pub name: String,
}

impl SyncArguments {
    pub fn parse(arguments: &serde_json::Value) -> Result<Self, JobError> {
        let parsed: SyncArguments = serde_json::from_value(arguments.clone())
            .map_err(|err| JobError::InvalidArguments(err.to_string()))?;

        for (field, value) in [("owner", &parsed.owner), ("name", &parsed.name)] {
            if value.trim().is_empty() {
                return Err(JobError::InvalidArguments(format!("{field} is required")));
            }
            if value.contains('/') || value.chars().any(char::is_whitespace) {
                return Err(JobError::InvalidArguments(format!(
                    "{field} '{value}' is not a valid repository segment"
                )));
            }
        }

        Ok(parsed)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "owner": self.owner, "name": self.name })
    }
}

/// Counts gathered during one successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub full_resync: bool,
    pub pages: u32,
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub enriched: u32,
    pub enrichment_failures: u32,
    pub backfilled: u32,
    pub watermark: Option<DateTime<Utc>>,
}
