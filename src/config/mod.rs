//! Configuration loading for the tracksync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `TRACKSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

const ENV_PREFIX: &str = "TRACKSYNC_";

/// Application configuration derived from `TRACKSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub rate_limit_policy: RateLimitPolicyConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Job runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RunnerConfig {
    /// Milliseconds between claim attempts when the queue is idle
    #[serde(default = "default_runner_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Terminal jobs older than this are purged
    #[serde(default = "default_runner_job_retention_seconds")]
    pub job_retention_seconds: u64,
    /// How often the purge runs
    #[serde(default = "default_runner_purge_interval_seconds")]
    pub purge_interval_seconds: u64,
}

/// Outbound call policy for the remote tracker API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateLimitPolicyConfig {
    /// Minimum spacing between two outbound calls, in milliseconds (default: 250)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_MIN_INTERVAL_MS`
    #[serde(default = "default_rate_limit_min_interval_ms")]
    #[schema(example = 250)]
    pub min_interval_ms: u64,

    /// Backoff base for explicit quota exhaustion, in milliseconds (default: 1000)
    ///
    /// Delay for attempt `n` is `min(max_delay, base * 2^n + jitter)`.
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_QUOTA_BASE_MS`
    #[serde(default = "default_rate_limit_quota_base_ms")]
    #[schema(example = 1000)]
    pub quota_base_ms: u64,

    /// Backoff base for secondary throttling, server errors and null responses,
    /// in milliseconds (default: 5000)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_THROTTLE_BASE_MS`
    #[serde(default = "default_rate_limit_throttle_base_ms")]
    #[schema(example = 5000)]
    pub throttle_base_ms: u64,

    /// Upper bound for a single backoff delay, in milliseconds (default: 300000)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_MAX_DELAY_MS`
    #[serde(default = "default_rate_limit_max_delay_ms")]
    #[schema(example = 300000)]
    pub max_delay_ms: u64,

    /// Upper bound for the random jitter added to a backoff, in milliseconds (default: 1000)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_MAX_JITTER_MS`
    #[serde(default = "default_rate_limit_max_jitter_ms")]
    #[schema(example = 1000)]
    pub max_jitter_ms: u64,

    /// Attempts per call before the failure propagates (default: 5)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_MAX_ATTEMPTS`
    #[serde(default = "default_rate_limit_max_attempts")]
    #[schema(example = 5)]
    pub max_attempts: u32,

    /// Consecutive failures that raise the cooldown flag (default: 3)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_COOLDOWN_THRESHOLD`
    #[serde(default = "default_rate_limit_cooldown_threshold")]
    #[schema(example = 3)]
    pub cooldown_threshold: u32,

    /// Window the consecutive failures must fall into, in seconds (default: 60)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_FAILURE_WINDOW_SECONDS`
    #[serde(default = "default_rate_limit_failure_window_seconds")]
    #[schema(example = 60)]
    pub failure_window_seconds: u64,

    /// Length of the cooldown once raised, in seconds (default: 120)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_COOLDOWN_SECONDS`
    #[serde(default = "default_rate_limit_cooldown_seconds")]
    #[schema(example = 120)]
    pub cooldown_seconds: u64,

    /// Failure counters reset after this long without a failure, in seconds (default: 300)
    ///
    /// Environment variable: `TRACKSYNC_RATE_LIMIT_QUIET_RESET_SECONDS`
    #[serde(default = "default_rate_limit_quiet_reset_seconds")]
    #[schema(example = 300)]
    pub quiet_reset_seconds: u64,
}

/// Resumable sync handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Subtracted from the stored watermark to absorb clock skew (default: 300)
    ///
    /// A tunable heuristic, not a bound on worst-case skew.
    #[serde(default = "default_sync_clock_skew_buffer_seconds")]
    pub clock_skew_buffer_seconds: u64,
    /// Items requested per page (default: 100)
    #[serde(default = "default_sync_per_page")]
    pub per_page: u32,
    /// Maximum stored-but-unenriched items retried per pass (default: 200)
    #[serde(default = "default_sync_backfill_limit")]
    pub backfill_limit: u64,
    /// Job type enqueued after a successful pass, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_on_job_type: Option<String>,
    /// Priority of the follow-on job (default: 10)
    #[serde(default = "default_sync_follow_on_priority")]
    pub follow_on_priority: i16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            github_api_base: default_github_api_base(),
            github_token: None,
            runner: RunnerConfig::default(),
            rate_limit_policy: RateLimitPolicyConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_runner_tick_interval_ms(),
            job_retention_seconds: default_runner_job_retention_seconds(),
            purge_interval_seconds: default_runner_purge_interval_seconds(),
        }
    }
}

impl Default for RateLimitPolicyConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_rate_limit_min_interval_ms(),
            quota_base_ms: default_rate_limit_quota_base_ms(),
            throttle_base_ms: default_rate_limit_throttle_base_ms(),
            max_delay_ms: default_rate_limit_max_delay_ms(),
            max_jitter_ms: default_rate_limit_max_jitter_ms(),
            max_attempts: default_rate_limit_max_attempts(),
            cooldown_threshold: default_rate_limit_cooldown_threshold(),
            failure_window_seconds: default_rate_limit_failure_window_seconds(),
            cooldown_seconds: default_rate_limit_cooldown_seconds(),
            quiet_reset_seconds: default_rate_limit_quiet_reset_seconds(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            clock_skew_buffer_seconds: default_sync_clock_skew_buffer_seconds(),
            per_page: default_sync_per_page(),
            backfill_limit: default_sync_backfill_limit(),
            follow_on_job_type: None,
            follow_on_priority: default_sync_follow_on_priority(),
        }
    }
}

impl RunnerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate runner configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms < 50 || self.tick_interval_ms > 60_000 {
            return Err(ConfigError::InvalidRunnerTickInterval {
                value: self.tick_interval_ms,
            });
        }

        if self.job_retention_seconds < 3600 {
            return Err(ConfigError::InvalidJobRetention {
                value: self.job_retention_seconds,
            });
        }

        if self.purge_interval_seconds < 60 {
            return Err(ConfigError::InvalidPurgeInterval {
                value: self.purge_interval_seconds,
            });
        }

        Ok(())
    }
}

impl RateLimitPolicyConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn quiet_reset(&self) -> Duration {
        Duration::from_secs(self.quiet_reset_seconds)
    }

    /// Validate rate limit policy configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota_base_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRateLimitBounds {
                base: self.quota_base_ms,
                max: self.max_delay_ms,
            });
        }

        if self.throttle_base_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRateLimitBounds {
                base: self.throttle_base_ms,
                max: self.max_delay_ms,
            });
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRateLimitAttempts {
                value: self.max_attempts,
            });
        }

        if self.cooldown_threshold == 0 {
            return Err(ConfigError::InvalidCooldownThreshold {
                value: self.cooldown_threshold,
            });
        }

        Ok(())
    }
}

impl SyncConfig {
    pub fn clock_skew_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_buffer_seconds as i64)
    }

    /// Validate sync configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_page == 0 || self.per_page > 100 {
            return Err(ConfigError::InvalidSyncPerPage {
                value: self.per_page,
            });
        }

        if let Some(job_type) = &self.follow_on_job_type
            && job_type.trim().is_empty()
        {
            return Err(ConfigError::InvalidFollowOnJobType);
        }

        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.github_token.is_some() {
            config.github_token = Some("[REDACTED]".to_string());
        }
        if let Some(at) = config.database_url.find('@') {
            // Drop credentials embedded in the connection string.
            if let Some(scheme_end) = config.database_url.find("://") {
                config.database_url = format!(
                    "{}[REDACTED]{}",
                    &config.database_url[..scheme_end + 3],
                    &config.database_url[at..]
                );
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.profile.as_str(), "local" | "test") && self.github_token.is_none() {
            return Err(ConfigError::MissingGitHubToken);
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        self.runner.validate()?;
        self.rate_limit_policy.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/tracksync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_runner_tick_interval_ms() -> u64 {
    1000
}

fn default_runner_job_retention_seconds() -> u64 {
    7 * 24 * 3600 // 7 days
}

fn default_runner_purge_interval_seconds() -> u64 {
    3600 // 1 hour
}

fn default_rate_limit_min_interval_ms() -> u64 {
    250
}

fn default_rate_limit_quota_base_ms() -> u64 {
    1000
}

fn default_rate_limit_throttle_base_ms() -> u64 {
    5000
}

fn default_rate_limit_max_delay_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_rate_limit_max_jitter_ms() -> u64 {
    1000
}

fn default_rate_limit_max_attempts() -> u32 {
    5
}

fn default_rate_limit_cooldown_threshold() -> u32 {
    3
}

fn default_rate_limit_failure_window_seconds() -> u64 {
    60
}

fn default_rate_limit_cooldown_seconds() -> u64 {
    120
}

fn default_rate_limit_quiet_reset_seconds() -> u64 {
    300
}

fn default_sync_clock_skew_buffer_seconds() -> u64 {
    300 // 5 minutes
}

fn default_sync_per_page() -> u32 {
    100
}

fn default_sync_backfill_limit() -> u64 {
    200
}

fn default_sync_follow_on_priority() -> i16 {
    10
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("GitHub token is missing; set TRACKSYNC_GITHUB_TOKEN environment variable")]
    MissingGitHubToken,
    #[error("database url is missing; set TRACKSYNC_DATABASE_URL environment variable")]
    MissingDatabaseUrl,
    #[error("runner tick interval must be between 50 and 60000 milliseconds, got {value}")]
    InvalidRunnerTickInterval { value: u64 },
    #[error("job retention must be at least 3600 seconds, got {value}")]
    InvalidJobRetention { value: u64 },
    #[error("job purge interval must be at least 60 seconds, got {value}")]
    InvalidPurgeInterval { value: u64 },
    #[error("rate limit base delay ({base}ms) cannot be greater than max delay ({max}ms)")]
    InvalidRateLimitBounds { base: u64, max: u64 },
    #[error("rate limit max attempts must be at least 1, got {value}")]
    InvalidRateLimitAttempts { value: u32 },
    #[error("rate limit cooldown threshold must be at least 1, got {value}")]
    InvalidCooldownThreshold { value: u32 },
    #[error("sync page size must be between 1 and 100, got {value}")]
    InvalidSyncPerPage { value: u32 },
    #[error("follow-on job type cannot be blank")]
    InvalidFollowOnJobType,
}

/// Loads configuration using layered `.env` files and `TRACKSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from the layered files, then the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);

        let runner_defaults = RunnerConfig::default();
        let runner = RunnerConfig {
            tick_interval_ms: parse_or(
                &mut layered,
                "RUNNER_TICK_INTERVAL_MS",
                runner_defaults.tick_interval_ms,
            ),
            job_retention_seconds: parse_or(
                &mut layered,
                "RUNNER_JOB_RETENTION_SECONDS",
                runner_defaults.job_retention_seconds,
            ),
            purge_interval_seconds: parse_or(
                &mut layered,
                "RUNNER_PURGE_INTERVAL_SECONDS",
                runner_defaults.purge_interval_seconds,
            ),
        };

        let policy_defaults = RateLimitPolicyConfig::default();
        let rate_limit_policy = RateLimitPolicyConfig {
            min_interval_ms: parse_or(
                &mut layered,
                "RATE_LIMIT_MIN_INTERVAL_MS",
                policy_defaults.min_interval_ms,
            ),
            quota_base_ms: parse_or(
                &mut layered,
                "RATE_LIMIT_QUOTA_BASE_MS",
                policy_defaults.quota_base_ms,
            ),
            throttle_base_ms: parse_or(
                &mut layered,
                "RATE_LIMIT_THROTTLE_BASE_MS",
                policy_defaults.throttle_base_ms,
            ),
            max_delay_ms: parse_or(
                &mut layered,
                "RATE_LIMIT_MAX_DELAY_MS",
                policy_defaults.max_delay_ms,
            ),
            max_jitter_ms: parse_or(
                &mut layered,
                "RATE_LIMIT_MAX_JITTER_MS",
                policy_defaults.max_jitter_ms,
            ),
            max_attempts: parse_or(
                &mut layered,
                "RATE_LIMIT_MAX_ATTEMPTS",
                policy_defaults.max_attempts,
            ),
            cooldown_threshold: parse_or(
                &mut layered,
                "RATE_LIMIT_COOLDOWN_THRESHOLD",
                policy_defaults.cooldown_threshold,
            ),
            failure_window_seconds: parse_or(
                &mut layered,
                "RATE_LIMIT_FAILURE_WINDOW_SECONDS",
                policy_defaults.failure_window_seconds,
            ),
            cooldown_seconds: parse_or(
                &mut layered,
                "RATE_LIMIT_COOLDOWN_SECONDS",
                policy_defaults.cooldown_seconds,
            ),
            quiet_reset_seconds: parse_or(
                &mut layered,
                "RATE_LIMIT_QUIET_RESET_SECONDS",
                policy_defaults.quiet_reset_seconds,
            ),
        };

        let sync_defaults = SyncConfig::default();
        let sync = SyncConfig {
            clock_skew_buffer_seconds: parse_or(
                &mut layered,
                "SYNC_CLOCK_SKEW_BUFFER_SECONDS",
                sync_defaults.clock_skew_buffer_seconds,
            ),
            per_page: parse_or(&mut layered, "SYNC_PER_PAGE", sync_defaults.per_page),
            backfill_limit: parse_or(
                &mut layered,
                "SYNC_BACKFILL_LIMIT",
                sync_defaults.backfill_limit,
            ),
            follow_on_job_type: non_empty(layered.remove("SYNC_FOLLOW_ON_JOB_TYPE")),
            follow_on_priority: parse_or(
                &mut layered,
                "SYNC_FOLLOW_ON_PRIORITY",
                sync_defaults.follow_on_priority,
            ),
        };

        let config = AppConfig {
            profile,
            api_bind_addr: non_empty(layered.remove("API_BIND_ADDR"))
                .unwrap_or_else(default_api_bind_addr),
            log_level: non_empty(layered.remove("LOG_LEVEL")).unwrap_or_else(default_log_level),
            log_format: non_empty(layered.remove("LOG_FORMAT"))
                .unwrap_or_else(default_log_format),
            database_url: non_empty(layered.remove("DATABASE_URL"))
                .unwrap_or_else(default_database_url),
            db_max_connections: parse_or(
                &mut layered,
                "DB_MAX_CONNECTIONS",
                default_db_max_connections(),
            ),
            db_acquire_timeout_ms: parse_or(
                &mut layered,
                "DB_ACQUIRE_TIMEOUT_MS",
                default_db_acquire_timeout_ms(),
            ),
            github_api_base: non_empty(layered.remove("GITHUB_API_BASE"))
                .unwrap_or_else(default_github_api_base),
            github_token: non_empty(layered.remove("GITHUB_TOKEN")),
            runner,
            rate_limit_policy,
            sync,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|val| {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_or<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: T,
) -> T {
    layered
        .remove(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn production_profile_requires_github_token() {
        let config = AppConfig {
            profile: "production".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingGitHubToken)
        ));

        let config = AppConfig {
            profile: "production".to_string(),
            github_token: Some("ghp_test".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_limit_policy_validation() {
        assert!(RateLimitPolicyConfig::default().validate().is_ok());

        let inverted = RateLimitPolicyConfig {
            throttle_base_ms: 10_000,
            max_delay_ms: 5_000,
            ..RateLimitPolicyConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidRateLimitBounds { .. })
        ));

        let no_attempts = RateLimitPolicyConfig {
            max_attempts: 0,
            ..RateLimitPolicyConfig::default()
        };
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn sync_page_size_is_bounded() {
        let config = SyncConfig {
            per_page: 500,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSyncPerPage { value: 500 })
        ));
    }

    #[test]
    fn redaction_hides_token_and_database_credentials() {
        let config = AppConfig {
            github_token: Some("ghp_secret".to_string()),
            database_url: "postgresql://user:pass@db:5432/tracksync".to_string(),
            ..AppConfig::default()
        };

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("ghp_secret"));
        assert!(!json.contains("user:pass"));
        assert!(json.contains("postgresql://[REDACTED]@db:5432/tracksync"));
    }
}
