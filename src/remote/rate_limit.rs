//! Process-wide failure tracking for the remote API.
//!
//! Failed call attempts are counted across every handler sharing one
//! [`RateLimitState`]. Reaching the threshold inside the failure window raises
//! a cooldown that the runner consults before starting new work. Counters
//! reset on success or after a quiet interval with no failures.

use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::warn;

use crate::config::RateLimitPolicyConfig;

use super::FailureClass;

#[derive(Debug, Clone, Copy)]
pub struct CooldownPolicy {
    pub threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
    pub quiet_reset: Duration,
}

impl From<&RateLimitPolicyConfig> for CooldownPolicy {
    fn from(config: &RateLimitPolicyConfig) -> Self {
        Self {
            threshold: config.cooldown_threshold,
            failure_window: config.failure_window(),
            cooldown: config.cooldown(),
            quiet_reset: config.quiet_reset(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    consecutive_failures: u32,
    window_started_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    cooldown_until: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimitState {
    policy: CooldownPolicy,
    counters: Mutex<Counters>,
}

impl RateLimitState {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Record a failed attempt. Returns true when this failure raised the cooldown.
    pub fn record_failure(&self, class: FailureClass) -> bool {
        let now = Instant::now();
        let mut counters = self.lock();

        if let Some(last) = counters.last_failure_at
            && now.duration_since(last) >= self.policy.quiet_reset
        {
            counters.consecutive_failures = 0;
            counters.window_started_at = None;
        }

        match counters.window_started_at {
            Some(started) if now.duration_since(started) <= self.policy.failure_window => {
                counters.consecutive_failures += 1;
            }
            _ => {
                counters.window_started_at = Some(now);
                counters.consecutive_failures = 1;
            }
        }
        counters.last_failure_at = Some(now);

        if counters.consecutive_failures < self.policy.threshold {
            return false;
        }

        let until = now + self.policy.cooldown;
        counters.cooldown_until = Some(counters.cooldown_until.map_or(until, |u| u.max(until)));
        let failures = counters.consecutive_failures;
        counters.consecutive_failures = 0;
        counters.window_started_at = None;
        drop(counters);

        counter!("tracksync_remote_cooldowns_total", "class" => class.as_str()).increment(1);
        warn!(
            failures,
            class = class.as_str(),
            cooldown_secs = self.policy.cooldown.as_secs(),
            "remote failure threshold reached, entering cooldown"
        );
        true
    }

    /// A success breaks the consecutive run. An active cooldown still expires on its own.
    pub fn record_success(&self) {
        let mut counters = self.lock();
        counters.consecutive_failures = 0;
        counters.window_started_at = None;
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .cooldown_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_remaining().is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CooldownPolicy {
        CooldownPolicy {
            threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
            quiet_reset: Duration::from_secs(300),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn third_failure_in_window_raises_cooldown() {
        let state = RateLimitState::new(policy());

        assert!(!state.record_failure(FailureClass::Abuse));
        assert!(!state.record_failure(FailureClass::Abuse));
        assert!(!state.is_cooling_down());
        assert!(state.record_failure(FailureClass::Abuse));

        let remaining = state.cooldown_remaining().unwrap();
        assert_eq!(remaining, Duration::from_secs(120));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(state.cooldown_remaining(), Some(Duration::from_secs(20)));

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(!state.is_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_spread_beyond_the_window_do_not_accumulate() {
        let state = RateLimitState::new(policy());

        state.record_failure(FailureClass::ServerError);
        state.record_failure(FailureClass::ServerError);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!state.record_failure(FailureClass::ServerError));
        assert_eq!(state.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_breaks_the_run() {
        let state = RateLimitState::new(policy());

        state.record_failure(FailureClass::Quota);
        state.record_failure(FailureClass::Quota);
        state.record_success();
        assert!(!state.record_failure(FailureClass::Quota));
        assert_eq!(state.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_interval_clears_counters() {
        let state = RateLimitState::new(CooldownPolicy {
            failure_window: Duration::from_secs(3600),
            ..policy()
        });

        state.record_failure(FailureClass::NullResponse);
        state.record_failure(FailureClass::NullResponse);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!state.record_failure(FailureClass::NullResponse));
        assert_eq!(state.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_an_active_cooldown() {
        let state = RateLimitState::new(policy());
        for _ in 0..3 {
            state.record_failure(FailureClass::Abuse);
        }
        assert!(state.is_cooling_down());

        state.reset();
        assert!(!state.is_cooling_down());
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_instances_do_not_share_state() {
        let a = RateLimitState::new(policy());
        let b = RateLimitState::new(policy());
        for _ in 0..3 {
            a.record_failure(FailureClass::Abuse);
        }
        assert!(a.is_cooling_down());
        assert!(!b.is_cooling_down());
    }
}
