//! Rate-aware wrapper around a [`RemoteApi`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::config::RateLimitPolicyConfig;

use super::{
    FailureClass, RateLimitState, RemoteApi, RemoteError, RemotePage, RemoteSubItem, RepoRef,
};

/// Result of a call after retries, split by what the caller should do next.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Retryable failure that outlasted the attempt budget.
    Retryable {
        class: FailureClass,
        error: RemoteError,
    },
    Fatal(RemoteError),
}

impl<T> CallOutcome<T> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CallOutcome::Retryable { class, .. } if class.is_rate_limit())
    }

    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            CallOutcome::Ok(value) => Ok(value),
            CallOutcome::Retryable { error, .. } | CallOutcome::Fatal(error) => Err(error),
        }
    }
}

/// Delay before retrying attempt `attempt` (0-based) of a call that failed with `class`.
///
/// `min(max_delay, max(base * 2^attempt, retry_after) + jitter)`, where quota
/// exhaustion uses the quota base and every other class the larger throttle base.
pub fn backoff_delay(
    policy: &RateLimitPolicyConfig,
    class: FailureClass,
    attempt: u32,
    retry_after: Option<Duration>,
    jitter: Duration,
) -> Duration {
    let base_ms = match class {
        FailureClass::Quota => policy.quota_base_ms,
        _ => policy.throttle_base_ms,
    };
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let exponential = Duration::from_millis(base_ms.saturating_mul(factor));
    let wanted = exponential.max(retry_after.unwrap_or_default());

    wanted
        .saturating_add(jitter)
        .min(Duration::from_millis(policy.max_delay_ms))
}

fn sample_jitter(policy: &RateLimitPolicyConfig) -> Duration {
    if policy.max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=policy.max_jitter_ms))
}

/// Spaces, classifies and retries calls to the remote.
///
/// One instance is shared by every handler in the process, so the minimum
/// spacing and the cooldown apply across repositories.
pub struct RateAwareCaller {
    api: Arc<dyn RemoteApi>,
    policy: RateLimitPolicyConfig,
    state: Arc<RateLimitState>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateAwareCaller {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        policy: RateLimitPolicyConfig,
        state: Arc<RateLimitState>,
    ) -> Self {
        Self {
            api,
            policy,
            state,
            next_slot: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<RateLimitState> {
        &self.state
    }

    /// Fetch one page. An empty page that still points at a next page is
    /// treated as a soft throttle.
    pub async fn fetch_page(
        &self,
        repo: &RepoRef,
        cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> CallOutcome<RemotePage> {
        let api = &self.api;
        self.call("fetch_page", || async move {
            match api.fetch_page(repo, cursor, since).await {
                Ok(page) if page.items.is_empty() && page.next_cursor.is_some() => {
                    Err(RemoteError::NullResponse)
                }
                other => other,
            }
        })
        .await
    }

    /// Collect an item's full sub-resource set.
    ///
    /// Every page is its own spaced, retried call, so a failure on a later
    /// page retries only that page.
    pub async fn fetch_subresource(
        &self,
        repo: &RepoRef,
        item_number: i32,
    ) -> CallOutcome<Vec<RemoteSubItem>> {
        let api = &self.api;
        let mut sub_items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let current = cursor.as_deref();
            let outcome = self
                .call("fetch_subresource", || async move {
                    match api.fetch_subresource_page(repo, item_number, current).await {
                        Ok(page) if page.items.is_empty() && page.next_cursor.is_some() => {
                            Err(RemoteError::NullResponse)
                        }
                        other => other,
                    }
                })
                .await;

            let page = match outcome {
                CallOutcome::Ok(page) => page,
                CallOutcome::Retryable { class, error } => {
                    return CallOutcome::Retryable { class, error };
                }
                CallOutcome::Fatal(error) => return CallOutcome::Fatal(error),
            };

            sub_items.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return CallOutcome::Ok(sub_items),
            }
        }
    }

    /// Run `op` with spacing, cooldown waits and bounded classified retries.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, mut op: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.wait_for_cooldown().await;
            self.wait_for_slot().await;

            let error = match op().await {
                Ok(value) => {
                    self.state.record_success();
                    return CallOutcome::Ok(value);
                }
                Err(error) => error,
            };

            let class = error.class();
            counter!(
                "tracksync_remote_failures_total",
                "operation" => operation,
                "class" => class.as_str()
            )
            .increment(1);

            if !class.is_retryable() {
                warn!(operation, error = %error, "remote call failed permanently");
                return CallOutcome::Fatal(error);
            }

            self.state.record_failure(class);
            attempt += 1;

            if attempt >= max_attempts {
                warn!(
                    operation,
                    attempts = attempt,
                    class = class.as_str(),
                    error = %error,
                    "remote call exhausted retries"
                );
                return CallOutcome::Retryable { class, error };
            }

            let delay = backoff_delay(
                &self.policy,
                class,
                attempt - 1,
                error.retry_after(),
                sample_jitter(&self.policy),
            );
            histogram!("tracksync_remote_backoff_seconds", "class" => class.as_str())
                .record(delay.as_secs_f64());
            warn!(
                operation,
                attempt,
                class = class.as_str(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "remote call failed, backing off"
            );
            sleep(delay).await;
        }
    }

    async fn wait_for_cooldown(&self) {
        if let Some(remaining) = self.state.cooldown_remaining() {
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                "waiting out remote cooldown"
            );
            sleep(remaining).await;
        }
    }

    /// Reserve the next send slot, then sleep until it without holding the lock.
    async fn wait_for_slot(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.policy.min_interval());
            slot
        };
        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CooldownPolicy, ItemKind, RemoteItem, RemoteSubPage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn policy() -> RateLimitPolicyConfig {
        RateLimitPolicyConfig {
            min_interval_ms: 100,
            quota_base_ms: 1_000,
            throttle_base_ms: 5_000,
            max_delay_ms: 60_000,
            max_jitter_ms: 0,
            max_attempts: 3,
            cooldown_threshold: 3,
            failure_window_seconds: 600,
            cooldown_seconds: 120,
            quiet_reset_seconds: 900,
        }
    }

    fn repo() -> RepoRef {
        RepoRef {
            repo_id: 1,
            owner: "acme".into(),
            name: "widgets".into(),
        }
    }

    fn item(id: i64) -> RemoteItem {
        let now = Utc::now();
        RemoteItem {
            external_id: id,
            number: id as i32,
            kind: ItemKind::Issue,
            title: format!("item {id}"),
            state: "open".into(),
            author: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Replays scripted results and records when each call happened.
    #[derive(Default)]
    struct ScriptedApi {
        pages: StdMutex<VecDeque<Result<RemotePage, RemoteError>>>,
        sub_pages: StdMutex<VecDeque<Result<RemoteSubPage, RemoteError>>>,
        sub_cursors: StdMutex<Vec<Option<String>>>,
        calls: StdMutex<Vec<Instant>>,
    }

    impl ScriptedApi {
        fn with_pages(pages: Vec<Result<RemotePage, RemoteError>>) -> Self {
            Self {
                pages: StdMutex::new(pages.into()),
                ..Self::default()
            }
        }

        fn with_sub_pages(sub_pages: Vec<Result<RemoteSubPage, RemoteError>>) -> Self {
            Self {
                sub_pages: StdMutex::new(sub_pages.into()),
                ..Self::default()
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteApi for ScriptedApi {
        async fn fetch_page(
            &self,
            _repo: &RepoRef,
            _cursor: Option<&str>,
            _since: Option<DateTime<Utc>>,
        ) -> Result<RemotePage, RemoteError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RemotePage::default()))
        }

        async fn fetch_subresource_page(
            &self,
            _repo: &RepoRef,
            _item_number: i32,
            cursor: Option<&str>,
        ) -> Result<RemoteSubPage, RemoteError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.sub_cursors
                .lock()
                .unwrap()
                .push(cursor.map(str::to_string));
            self.sub_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RemoteSubPage::default()))
        }
    }

    fn caller(api: Arc<ScriptedApi>, policy: RateLimitPolicyConfig) -> RateAwareCaller {
        let state = Arc::new(RateLimitState::new(CooldownPolicy::from(&policy)));
        RateAwareCaller::new(api, policy, state)
    }

    fn throttled() -> RemoteError {
        RemoteError::SecondaryThrottle {
            message: "You have exceeded a secondary rate limit".into(),
            retry_after: None,
        }
    }

    #[test]
    fn backoff_grows_then_caps() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for attempt in 0..12 {
            let delay = backoff_delay(&policy, FailureClass::Quota, attempt, None, Duration::ZERO);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(policy.max_delay_ms));
    }

    #[test]
    fn backoff_never_exceeds_cap_even_with_jitter() {
        let policy = RateLimitPolicyConfig {
            max_jitter_ms: 5_000,
            ..policy()
        };
        for attempt in [0, 3, 8, 63, 64, 200] {
            let delay = backoff_delay(
                &policy,
                FailureClass::Abuse,
                attempt,
                None,
                sample_jitter(&policy),
            );
            assert!(delay <= Duration::from_millis(policy.max_delay_ms + policy.max_jitter_ms));
        }
    }

    #[test]
    fn throttling_uses_larger_base_than_quota() {
        let policy = policy();
        let quota = backoff_delay(&policy, FailureClass::Quota, 0, None, Duration::ZERO);
        let abuse = backoff_delay(&policy, FailureClass::Abuse, 0, None, Duration::ZERO);
        let null = backoff_delay(&policy, FailureClass::NullResponse, 0, None, Duration::ZERO);

        assert_eq!(quota, Duration::from_millis(1_000));
        assert_eq!(abuse, Duration::from_millis(5_000));
        assert_eq!(null, abuse);
    }

    #[test]
    fn retry_after_hint_raises_the_floor() {
        let policy = policy();
        let delay = backoff_delay(
            &policy,
            FailureClass::Quota,
            0,
            Some(Duration::from_secs(30)),
            Duration::from_millis(250),
        );
        assert_eq!(delay, Duration::from_millis(30_250));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_errors_then_succeeds() {
        let api = Arc::new(ScriptedApi::with_pages(vec![
            Err(RemoteError::ServerError {
                status: 502,
                message: "Bad Gateway".into(),
            }),
            Ok(RemotePage {
                items: vec![item(1)],
                next_cursor: None,
            }),
        ]));
        let caller = caller(api.clone(), policy());

        let started = Instant::now();
        let outcome = caller.fetch_page(&repo(), None, None).await;

        let page = outcome.into_result().unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(5_000));
        assert_eq!(caller.state().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let api = Arc::new(ScriptedApi::with_pages(vec![Err(RemoteError::Client {
            status: 404,
            message: "Not Found".into(),
        })]));
        let caller = caller(api.clone(), policy());

        let outcome = caller.fetch_page(&repo(), None, None).await;

        assert!(matches!(outcome, CallOutcome::Fatal(RemoteError::Client { status: 404, .. })));
        assert_eq!(api.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_throttling_reports_rate_limit() {
        let api = Arc::new(ScriptedApi::with_pages(vec![
            Err(throttled()),
            Err(throttled()),
            Err(throttled()),
        ]));
        let caller = caller(api.clone(), policy());

        let outcome = caller.fetch_page(&repo(), None, None).await;

        assert!(outcome.is_rate_limited());
        assert!(matches!(
            outcome,
            CallOutcome::Retryable {
                class: FailureClass::Abuse,
                ..
            }
        ));
        assert_eq!(api.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_with_next_cursor_is_a_soft_throttle() {
        let api = Arc::new(ScriptedApi::with_pages(vec![
            Ok(RemotePage {
                items: Vec::new(),
                next_cursor: Some("page=2".into()),
            }),
            Ok(RemotePage {
                items: vec![item(9)],
                next_cursor: None,
            }),
        ]));
        let caller = caller(api.clone(), policy());

        let page = caller
            .fetch_page(&repo(), None, None)
            .await
            .into_result()
            .unwrap();

        assert_eq!(page.items[0].external_id, 9);
        assert_eq!(api.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_respect_minimum_spacing() {
        let api = Arc::new(ScriptedApi::default());
        let caller = caller(api.clone(), policy());

        for _ in 0..3 {
            caller.fetch_subresource(&repo(), 1).await.into_result().unwrap();
        }

        let times = api.call_times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    fn comment(id: i64) -> RemoteSubItem {
        RemoteSubItem {
            external_id: id,
            author: None,
            body: format!("comment {id}"),
            created_at: Utc::now(),
        }
    }

    fn sub_page(id: i64, next: Option<&str>) -> Result<RemoteSubPage, RemoteError> {
        Ok(RemoteSubPage {
            items: vec![comment(id)],
            next_cursor: next.map(str::to_string),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn subresource_pages_are_spaced_individually() {
        let api = Arc::new(ScriptedApi::with_sub_pages(vec![
            sub_page(1, Some("page=2")),
            sub_page(2, Some("page=3")),
            sub_page(3, Some("page=4")),
            sub_page(4, None),
        ]));
        let caller = caller(api.clone(), policy());

        let comments = caller
            .fetch_subresource(&repo(), 7)
            .await
            .into_result()
            .unwrap();

        let ids: Vec<_> = comments.iter().map(|c| c.external_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        let times = api.call_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_subresource_page_is_retried_alone() {
        let api = Arc::new(ScriptedApi::with_sub_pages(vec![
            sub_page(1, Some("page=2")),
            Err(throttled()),
            sub_page(2, None),
        ]));
        let caller = caller(api.clone(), policy());

        let comments = caller
            .fetch_subresource(&repo(), 7)
            .await
            .into_result()
            .unwrap();

        assert_eq!(comments.len(), 2);
        let cursors = api.sub_cursors.lock().unwrap().clone();
        assert_eq!(
            cursors,
            vec![None, Some("page=2".to_string()), Some("page=2".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn call_during_cooldown_waits_for_remaining_time() {
        let api = Arc::new(ScriptedApi::with_pages(vec![
            Err(throttled()),
            Err(throttled()),
            Err(throttled()),
            Ok(RemotePage::default()),
        ]));
        let policy = RateLimitPolicyConfig {
            max_attempts: 1,
            ..policy()
        };
        let caller = caller(api.clone(), policy);

        for _ in 0..3 {
            let outcome = caller.fetch_page(&repo(), None, None).await;
            assert!(outcome.is_rate_limited());
        }
        let remaining = caller.state().cooldown_remaining().unwrap();

        let before = Instant::now();
        caller
            .fetch_page(&repo(), None, None)
            .await
            .into_result()
            .unwrap();

        let fourth = *api.call_times().last().unwrap();
        assert!(fourth - before >= remaining);
    }
}
