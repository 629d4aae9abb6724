//! Remote tracker access.
//!
//! [`RemoteApi`] is the black-box page/sub-resource fetcher; [`caller`] wraps
//! it with spacing, classified retries and the process-wide cooldown kept in
//! [`rate_limit`].

pub mod caller;
pub mod github;
pub mod rate_limit;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use caller::{CallOutcome, RateAwareCaller, backoff_delay};
pub use github::GitHubClient;
pub use rate_limit::{CooldownPolicy, RateLimitState};

/// Repository addressed by a sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub repo_id: i64,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Issue or pull request as reported by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub external_id: i64,
    pub number: i32,
    pub kind: ItemKind,
    pub title: String,
    pub state: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Issue,
    PullRequest,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Issue => "issue",
            ItemKind::PullRequest => "pull_request",
        }
    }
}

/// One entry of an item's sub-resource set (a comment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubItem {
    pub external_id: i64,
    pub author: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub items: Vec<RemoteItem>,
    /// Opaque position of the following page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// One page of an item's sub-resource set.
#[derive(Debug, Clone, Default)]
pub struct RemoteSubPage {
    pub items: Vec<RemoteSubItem>,
    pub next_cursor: Option<String>,
}

/// Retry class assigned to a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Explicit quota exhaustion.
    Quota,
    /// Secondary or abuse throttling.
    Abuse,
    ServerError,
    /// Success-shaped response with no data (soft throttle).
    NullResponse,
    Fatal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Quota => "quota",
            FailureClass::Abuse => "abuse",
            FailureClass::ServerError => "server_error",
            FailureClass::NullResponse => "null_response",
            FailureClass::Fatal => "fatal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::Fatal)
    }

    /// Throttling in any of its forms. These abort a whole sync pass.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            FailureClass::Quota | FailureClass::Abuse | FailureClass::NullResponse
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("API quota exhausted")]
    QuotaExhausted { retry_after: Option<Duration> },

    #[error("secondary rate limit hit: {message}")]
    SecondaryThrottle {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("remote server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty response where data was expected")]
    NullResponse,

    #[error("request rejected with status {status}: {message}")]
    Client { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::QuotaExhausted { .. } => FailureClass::Quota,
            RemoteError::SecondaryThrottle { .. } => FailureClass::Abuse,
            RemoteError::ServerError { .. } | RemoteError::Transport(_) => {
                FailureClass::ServerError
            }
            RemoteError::NullResponse => FailureClass::NullResponse,
            RemoteError::Client { .. } | RemoteError::Decode(_) => FailureClass::Fatal,
        }
    }

    /// Delay the remote asked for, if it said.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::QuotaExhausted { retry_after }
            | RemoteError::SecondaryThrottle { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Page and sub-resource fetches against the remote tracker.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch one page of items. `cursor` is `None` for the first page;
    /// `since` restricts to items updated at or after that instant.
    async fn fetch_page(
        &self,
        repo: &RepoRef,
        cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RemotePage, RemoteError>;

    /// Fetch one page of an item's sub-resources, `cursor` as for [`fetch_page`].
    ///
    /// [`fetch_page`]: RemoteApi::fetch_page
    async fn fetch_subresource_page(
        &self,
        repo: &RepoRef,
        item_number: i32,
        cursor: Option<&str>,
    ) -> Result<RemoteSubPage, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_every_variant() {
        let cases = [
            (
                RemoteError::QuotaExhausted { retry_after: None },
                FailureClass::Quota,
            ),
            (
                RemoteError::SecondaryThrottle {
                    message: "slow down".into(),
                    retry_after: None,
                },
                FailureClass::Abuse,
            ),
            (
                RemoteError::ServerError {
                    status: 502,
                    message: String::new(),
                },
                FailureClass::ServerError,
            ),
            (
                RemoteError::Transport("reset".into()),
                FailureClass::ServerError,
            ),
            (RemoteError::NullResponse, FailureClass::NullResponse),
            (
                RemoteError::Client {
                    status: 404,
                    message: "Not Found".into(),
                },
                FailureClass::Fatal,
            ),
            (RemoteError::Decode("eof".into()), FailureClass::Fatal),
        ];

        for (error, expected) in cases {
            assert_eq!(error.class(), expected, "{error}");
        }
    }

    #[test]
    fn only_throttling_classes_count_as_rate_limits() {
        assert!(FailureClass::Quota.is_rate_limit());
        assert!(FailureClass::Abuse.is_rate_limit());
        assert!(FailureClass::NullResponse.is_rate_limit());
        assert!(!FailureClass::ServerError.is_rate_limit());
        assert!(!FailureClass::Fatal.is_rate_limit());
        assert!(!FailureClass::Fatal.is_retryable());
    }

    #[test]
    fn retry_after_hint_is_exposed() {
        let error = RemoteError::QuotaExhausted {
            retry_after: Some(Duration::from_secs(42)),
        };
        assert_eq!(error.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(RemoteError::NullResponse.retry_after(), None);
    }
}
