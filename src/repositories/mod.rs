//! # Repository Layer
//!
//! Data access for jobs, sync watermarks and synced items, wrapping SeaORM.

pub mod item;
pub mod job;
pub mod sync_state;

pub use item::{ItemRepository, UpsertKind, UpsertOutcome};
pub use job::{EnqueueOutcome, JobStore, JobStoreError, NewJob, QueueDepth};
pub use sync_state::SyncStateRepository;
