//! # Tracksync Library
//!
//! Durable background jobs and resumable repository sync: a rate-aware
//! remote caller, a database-backed job store, the runner that dispatches
//! claimed jobs, and the sync handler that mirrors a repository's items.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod remote;
pub mod repositories;
pub mod runner;
pub mod server;
pub mod sync;
pub mod telemetry;
pub use migration;
