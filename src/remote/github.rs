//! GitHub REST implementation of [`RemoteApi`].
//!
//! Issues and pull requests are listed through the issues endpoint ordered by
//! update time, and the cursor is the `rel="next"` URL of the `Link` header.
//! Comments form the per-item sub-resource set.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::{Origin, Url};

use super::{
    ItemKind, RemoteApi, RemoteError, RemoteItem, RemotePage, RemoteSubItem, RemoteSubPage,
    RepoRef,
};

const ACCEPT: &str = "application/vnd.github+json";
const USER_AGENT: &str = "tracksync/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    api_origin: Origin,
    token: Option<String>,
    per_page: u32,
}

impl GitHubClient {
    pub fn new(
        api_base: impl Into<String>,
        token: Option<String>,
        per_page: u32,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;

        let api_base = api_base.into().trim_end_matches('/').to_string();
        let api_origin = Url::parse(&api_base)
            .map_err(|err| RemoteError::Decode(format!("invalid api base {api_base}: {err}")))?
            .origin();

        Ok(Self {
            http,
            api_base,
            api_origin,
            token,
            per_page,
        })
    }

    /// Parse a `Link` cursor, refusing any URL outside the API origin so the
    /// token is only ever sent to the configured host.
    fn cursor_url(&self, cursor: &str) -> Result<Url, RemoteError> {
        let url = Url::parse(cursor)
            .map_err(|err| RemoteError::Decode(format!("invalid cursor {cursor}: {err}")))?;
        if url.origin() != self.api_origin {
            warn!(cursor, "cursor points outside the API origin");
            return Err(RemoteError::Decode(format!(
                "cursor {cursor} is outside the API origin"
            )));
        }
        Ok(url)
    }

    fn issues_url(&self, repo: &RepoRef, since: Option<DateTime<Utc>>) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&format!(
            "{}/repos/{}/{}/issues",
            self.api_base, repo.owner, repo.name
        ))
        .map_err(|err| RemoteError::Decode(format!("invalid issues url: {err}")))?;

        url.query_pairs_mut()
            .append_pair("state", "all")
            .append_pair("sort", "updated")
            .append_pair("direction", "asc")
            .append_pair("per_page", &self.per_page.to_string());

        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        Ok(url)
    }

    fn comments_url(&self, repo: &RepoRef, item_number: i32) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_base, repo.owner, repo.name, item_number
        ))
        .map_err(|err| RemoteError::Decode(format!("invalid comments url: {err}")))?;
        url.query_pairs_mut().append_pair("per_page", "100");
        Ok(url)
    }

    /// GET `url` and return the body of a successful response plus its next link.
    async fn get(&self, url: &str) -> Result<(String, Option<String>), RemoteError> {
        let mut request = self.http.get(url).header("Accept", ACCEPT);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;

        let response = classify_response(response).await?;
        let next = response
            .headers()
            .get("Link")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_link_header);

        let body = response
            .text()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;

        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(RemoteError::NullResponse);
        }

        Ok((body, next))
    }
}

#[async_trait]
impl RemoteApi for GitHubClient {
    async fn fetch_page(
        &self,
        repo: &RepoRef,
        cursor: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RemotePage, RemoteError> {
        let url = match cursor {
            Some(next) => self.cursor_url(next)?,
            None => self.issues_url(repo, since)?,
        };

        let (body, next_cursor) = self.get(url.as_str()).await?;
        let issues: Vec<GitHubIssue> =
            serde_json::from_str(&body).map_err(|err| RemoteError::Decode(err.to_string()))?;

        debug!(
            repo = %repo.full_name(),
            count = issues.len(),
            has_next = next_cursor.is_some(),
            "fetched issues page"
        );

        Ok(RemotePage {
            items: issues.into_iter().map(RemoteItem::from).collect(),
            next_cursor,
        })
    }

    async fn fetch_subresource_page(
        &self,
        repo: &RepoRef,
        item_number: i32,
        cursor: Option<&str>,
    ) -> Result<RemoteSubPage, RemoteError> {
        let url = match cursor {
            Some(next) => self.cursor_url(next)?,
            None => self.comments_url(repo, item_number)?,
        };

        let (body, next_cursor) = self.get(url.as_str()).await?;
        let comments: Vec<GitHubComment> =
            serde_json::from_str(&body).map_err(|err| RemoteError::Decode(err.to_string()))?;

        Ok(RemoteSubPage {
            items: comments.into_iter().map(RemoteSubItem::from).collect(),
            next_cursor,
        })
    }
}

/// Map a non-success response onto a classified [`RemoteError`].
async fn classify_response(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let retry_after = header("Retry-After")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let reset_in = header("X-RateLimit-Reset")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|reset| {
            let seconds = (reset - Utc::now().timestamp()).max(0) as u64;
            Duration::from_secs(seconds)
        });
    let quota_spent = header("X-RateLimit-Remaining").is_some_and(|v| v.trim() == "0");

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && quota_spent) {
        warn!(status = status.as_u16(), "GitHub quota exhausted");
        return Err(RemoteError::QuotaExhausted {
            retry_after: retry_after.or(reset_in),
        });
    }

    if status == StatusCode::FORBIDDEN {
        let lowered = body.to_ascii_lowercase();
        if lowered.contains("secondary rate limit") || lowered.contains("abuse") {
            warn!("GitHub secondary rate limit");
            return Err(RemoteError::SecondaryThrottle {
                message: error_message(&body),
                retry_after,
            });
        }
    }

    if status.is_server_error() {
        return Err(RemoteError::ServerError {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    Err(RemoteError::Client {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// GitHub error bodies are `{"message": ...}`; fall back to a truncated raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

/// Extract the `rel="next"` URL from a GitHub `Link` header.
fn parse_link_header(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|link| {
        let (url_part, params) = link.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == "rel=\"next\"") {
            return None;
        }
        let url_part = url_part.trim();
        let start = url_part.find('<')?;
        let end = url_part.find('>')?;
        Some(url_part[start + 1..end].to_string())
    })
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    id: i64,
    number: i32,
    title: String,
    state: String,
    user: Option<GitHubUser>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    pull_request: Option<serde_json::Value>,
}

impl From<GitHubIssue> for RemoteItem {
    fn from(issue: GitHubIssue) -> Self {
        Self {
            external_id: issue.id,
            number: issue.number,
            kind: if issue.pull_request.is_some() {
                ItemKind::PullRequest
            } else {
                ItemKind::Issue
            },
            title: issue.title,
            state: issue.state,
            author: issue.user.map(|u| u.login),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            closed_at: issue.closed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubComment {
    id: i64,
    user: Option<GitHubUser>,
    body: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<GitHubComment> for RemoteSubItem {
    fn from(comment: GitHubComment) -> Self {
        Self {
            external_id: comment.id,
            author: comment.user.map(|u| u.login),
            body: comment.body.unwrap_or_default(),
            created_at: comment.created_at,
        }
    }
}
