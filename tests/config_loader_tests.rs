use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tempfile::TempDir;
use tracksync::config::{ConfigError, ConfigLoader};

const MANAGED_VARS: &[&str] = &[
    "TRACKSYNC_PROFILE",
    "TRACKSYNC_API_BIND_ADDR",
    "TRACKSYNC_LOG_LEVEL",
    "TRACKSYNC_DATABASE_URL",
    "TRACKSYNC_GITHUB_TOKEN",
    "TRACKSYNC_RUNNER_TICK_INTERVAL_MS",
    "TRACKSYNC_RATE_LIMIT_MAX_ATTEMPTS",
    "TRACKSYNC_RATE_LIMIT_COOLDOWN_SECONDS",
    "TRACKSYNC_SYNC_CLOCK_SKEW_BUFFER_SECONDS",
    "TRACKSYNC_SYNC_PER_PAGE",
    "TRACKSYNC_SYNC_FOLLOW_ON_JOB_TYPE",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in MANAGED_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.runner.tick_interval_ms, 1000);
    assert_eq!(cfg.rate_limit_policy.max_attempts, 5);
    assert_eq!(cfg.rate_limit_policy.cooldown_threshold, 3);
    assert_eq!(cfg.sync.clock_skew_buffer_seconds, 300);
    assert!(cfg.sync.follow_on_job_type.is_none());
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    write_env_file(&dir, ".env", "TRACKSYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &dir,
        ".env.local",
        "TRACKSYNC_PROFILE=test\nTRACKSYNC_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(
        &dir,
        ".env.test",
        "TRACKSYNC_API_BIND_ADDR=127.0.0.1:5000\nTRACKSYNC_SYNC_PER_PAGE=25\n",
    );
    write_env_file(
        &dir,
        ".env.test.local",
        "TRACKSYNC_API_BIND_ADDR=127.0.0.1:6000\n",
    );

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "127.0.0.1:6000");
    assert_eq!(cfg.sync.per_page, 25);
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "TRACKSYNC_RATE_LIMIT_MAX_ATTEMPTS=3\nTRACKSYNC_SYNC_FOLLOW_ON_JOB_TYPE=score_items\n",
    );

    unsafe {
        env::set_var("TRACKSYNC_RATE_LIMIT_MAX_ATTEMPTS", "8");
        env::set_var("TRACKSYNC_RATE_LIMIT_COOLDOWN_SECONDS", "45");
        env::set_var("TRACKSYNC_SYNC_CLOCK_SKEW_BUFFER_SECONDS", "60");
    }

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();
    clear_env();

    assert_eq!(cfg.rate_limit_policy.max_attempts, 8);
    assert_eq!(cfg.rate_limit_policy.cooldown_seconds, 45);
    assert_eq!(cfg.sync.clock_skew_buffer().num_seconds(), 60);
    assert_eq!(cfg.sync.follow_on_job_type.as_deref(), Some("score_items"));
}

#[test]
fn production_profile_requires_github_token() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("TRACKSYNC_PROFILE", "production");
    }

    let result = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();

    assert!(matches!(result, Err(ConfigError::MissingGitHubToken)));

    unsafe {
        env::set_var("TRACKSYNC_GITHUB_TOKEN", "ghp_example");
    }
    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();
    clear_env();

    assert_eq!(cfg.github_token.as_deref(), Some("ghp_example"));
    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("ghp_example"));
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("TRACKSYNC_RUNNER_TICK_INTERVAL_MS", "10");
    }
    let result = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();
    assert!(matches!(
        result,
        Err(ConfigError::InvalidRunnerTickInterval { value: 10 })
    ));
    clear_env();

    unsafe {
        env::set_var("TRACKSYNC_SYNC_PER_PAGE", "500");
    }
    let result = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();
    assert!(matches!(
        result,
        Err(ConfigError::InvalidSyncPerPage { value: 500 })
    ));
    clear_env();

    unsafe {
        env::set_var("TRACKSYNC_API_BIND_ADDR", "not-an-address");
    }
    let result = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();
    assert!(matches!(result, Err(ConfigError::InvalidBindAddr { .. })));
    clear_env();
}
