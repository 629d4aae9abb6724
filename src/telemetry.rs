//! Tracing setup and request-scoped correlation ids.
//!
//! The subscriber is JSON by default, with the crate and its migrations at
//! the configured level and dependencies held at `warn` unless `RUST_LOG`
//! says otherwise. `log` records (sqlx among them) are bridged into tracing.

use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Longest caller-supplied request id kept as a correlation id.
const MAX_REQUEST_ID_LEN: usize = 64;

/// Correlation id carried through an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Build a fresh context with a short random correlation id.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            trace_id: format!("corr-{}", &id[..8]),
        }
    }

    /// Adopt an inbound `x-request-id` when it is short printable ASCII,
    /// otherwise generate one.
    pub fn from_request_id(request_id: Option<&str>) -> Self {
        match request_id.map(str::trim) {
            Some(id)
                if !id.is_empty()
                    && id.len() <= MAX_REQUEST_ID_LEN
                    && id.bytes().all(|b| b.is_ascii_graphic()) =>
            {
                Self {
                    trace_id: id.to_string(),
                }
            }
            _ => Self::generate(),
        }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("another logger is installed, `log` records cannot be bridged: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Filter used when `RUST_LOG` is unset.
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "warn,tracksync={level},migration={level},tower_http=info"
    ))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    let result = install(config);
    if result.is_err() {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
    }
    result
}

fn install(config: &AppConfig) -> Result<(), TelemetryInitError> {
    LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Run `future` with `context` available to [`current_trace_id`].
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_trace_ids_are_prefixed_and_short() {
        let ctx = TraceContext::generate();
        assert!(ctx.trace_id.starts_with("corr-"));
        assert_eq!(ctx.trace_id.len(), 13);
    }

    #[test]
    fn inbound_request_ids_are_kept_only_when_sane() {
        assert_eq!(
            TraceContext::from_request_id(Some(" edge-42 ")).trace_id,
            "edge-42"
        );

        let too_long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        for rejected in [None, Some(""), Some("has space"), Some("tab\tid"), Some(too_long.as_str())] {
            let ctx = TraceContext::from_request_id(rejected);
            assert!(ctx.trace_id.starts_with("corr-"), "{rejected:?}");
        }
    }

    #[test]
    fn default_filter_scopes_crate_level() {
        let filter = default_filter("debug").to_string();
        assert!(filter.contains("tracksync=debug"));
        assert!(filter.contains("migration=debug"));
    }

    #[tokio::test]
    async fn trace_id_is_scoped_to_the_future() {
        assert!(current_trace_id().is_none());

        let seen = with_trace_context(
            TraceContext {
                trace_id: "corr-abc12345".to_string(),
            },
            async { current_trace_id() },
        )
        .await;

        assert_eq!(seen.as_deref(), Some("corr-abc12345"));
        assert!(current_trace_id().is_none());
    }
}
