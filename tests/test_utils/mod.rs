//! Test utilities shared by the integration suites.
//!
//! In-memory SQLite with migrations applied, a scripted [`RemoteApi`] fake, and
//! builders for the runtime pieces under test.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

use tracksync::config::{RateLimitPolicyConfig, SyncConfig};
use tracksync::remote::{
    CooldownPolicy, ItemKind, RateAwareCaller, RateLimitState, RemoteApi, RemoteError, RemoteItem,
    RemotePage, RemoteSubItem, RemoteSubPage, RepoRef,
};
use tracksync::repositories::{ItemRepository, JobStore, SyncStateRepository};
use tracksync::sync::SyncHandler;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Policy that retries once with millisecond delays and never cools down.
pub fn fast_policy() -> RateLimitPolicyConfig {
    RateLimitPolicyConfig {
        min_interval_ms: 0,
        quota_base_ms: 1,
        throttle_base_ms: 1,
        max_delay_ms: 5,
        max_jitter_ms: 0,
        max_attempts: 2,
        cooldown_threshold: 1_000,
        failure_window_seconds: 60,
        cooldown_seconds: 1,
        quiet_reset_seconds: 300,
    }
}

pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        clock_skew_buffer_seconds: 300,
        per_page: 100,
        backfill_limit: 200,
        follow_on_job_type: None,
        follow_on_priority: 10,
    }
}

pub fn repo() -> RepoRef {
    RepoRef {
        repo_id: 1296269,
        owner: "acme".to_string(),
        name: "widgets".to_string(),
    }
}

pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600 + seconds, 0)
        .single()
        .expect("valid timestamp")
}

/// Remote item `number`, with external id `1000 + number`.
pub fn item(number: i32, state: &str, updated_at: DateTime<Utc>) -> RemoteItem {
    RemoteItem {
        external_id: 1000 + number as i64,
        number,
        kind: ItemKind::Issue,
        title: format!("Item #{number}"),
        state: state.to_string(),
        author: Some("octocat".to_string()),
        created_at: updated_at - Duration::days(1),
        updated_at,
        closed_at: (state == "closed").then_some(updated_at),
    }
}

pub fn comment(external_id: i64, body: &str) -> RemoteSubItem {
    RemoteSubItem {
        external_id,
        author: Some("reviewer".to_string()),
        body: body.to_string(),
        created_at: ts(0),
    }
}

/// Scripted remote keyed by cursor (`""` for the first page) and item number.
///
/// Each key serves its queued responses in order; the last one repeats.
/// Sub-resources are served as a single page; unscripted items have none.
#[derive(Default)]
pub struct ScriptedRemote {
    pages: Mutex<HashMap<String, VecDeque<Result<RemotePage, RemoteError>>>>,
    subresources: Mutex<HashMap<i32, VecDeque<Result<Vec<RemoteSubItem>, RemoteError>>>>,
    page_calls: Mutex<Vec<(Option<String>, Option<DateTime<Utc>>)>>,
    sub_calls: Mutex<Vec<i32>>,
    page_latency: Mutex<std::time::Duration>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, cursor: &str, response: Result<RemotePage, RemoteError>) {
        self.pages
            .lock()
            .unwrap()
            .entry(cursor.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn items(&self, cursor: &str, items: Vec<RemoteItem>, next: Option<&str>) {
        self.page(
            cursor,
            Ok(RemotePage {
                items,
                next_cursor: next.map(str::to_string),
            }),
        );
    }

    pub fn subresource(&self, number: i32, response: Result<Vec<RemoteSubItem>, RemoteError>) {
        self.subresources
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push_back(response);
    }

    /// Delay every page fetch by `latency`.
    pub fn set_page_latency(&self, latency: std::time::Duration) {
        *self.page_latency.lock().unwrap() = latency;
    }

    /// Drop every scripted response.
    pub fn clear(&self) {
        self.pages.lock().unwrap().clear();
        self.subresources.lock().unwrap().clear();
    }

    pub fn page_calls(&self) -> Vec<(Option<String>, Option<DateTime<Utc>>)> {
        self.page_calls.lock().unwrap().clone()
    }

    pub fn sub_calls(&self) -> Vec<i32> {
        self.sub_calls.lock().unwrap().clone()
    }

    fn pop_scripted<T: Clone>(
        queue: Option<&mut VecDeque<Result<T, RemoteError>>>,
    ) -> Option<Result<T, RemoteError>> {
        let queue = queue?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn fetch_page(
        &self,
        _repo: &RepoRef,
        cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RemotePage, RemoteError> {
        self.page_calls
            .lock()
            .unwrap()
            .push((cursor.map(str::to_string), since));
        let latency = *self.page_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut pages = self.pages.lock().unwrap();
        Self::pop_scripted(pages.get_mut(cursor.unwrap_or(""))).unwrap_or_else(|| {
            Err(RemoteError::Client {
                status: 404,
                message: format!("no page scripted for cursor {cursor:?}"),
            })
        })
    }

    async fn fetch_subresource_page(
        &self,
        _repo: &RepoRef,
        item_number: i32,
        _cursor: Option<&str>,
    ) -> Result<RemoteSubPage, RemoteError> {
        self.sub_calls.lock().unwrap().push(item_number);
        let mut subresources = self.subresources.lock().unwrap();
        let items = Self::pop_scripted(subresources.get_mut(&item_number))
            .unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(RemoteSubPage {
            items,
            next_cursor: None,
        })
    }
}

/// Everything a sync pass needs, wired against `db` and `remote`.
pub struct SyncHarness {
    pub handler: SyncHandler,
    pub items: ItemRepository,
    pub states: SyncStateRepository,
    pub jobs: JobStore,
    pub rate_limit: Arc<RateLimitState>,
}

pub fn sync_harness(
    db: &DatabaseConnection,
    remote: Arc<ScriptedRemote>,
    config: SyncConfig,
) -> SyncHarness {
    let policy = fast_policy();
    let rate_limit = Arc::new(RateLimitState::new(CooldownPolicy::from(&policy)));
    let caller = Arc::new(RateAwareCaller::new(remote, policy, Arc::clone(&rate_limit)));
    let items = ItemRepository::new(db.clone());
    let states = SyncStateRepository::new(db.clone());
    let jobs = JobStore::new(db.clone());

    SyncHarness {
        handler: SyncHandler::new(caller, items.clone(), states.clone(), jobs.clone(), config),
        items,
        states,
        jobs,
        rate_limit,
    }
}
