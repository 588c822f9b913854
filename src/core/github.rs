//! Hosting API client: resolves the tip commit of a branch.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::git::RepoSlug;
use crate::state::CommitId;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Remote collaborator answering "what is the tip of this branch?".
#[async_trait]
pub trait CommitSource: Send + Sync {
    async fn tip_commit(&self, repo: &RepoSlug, branch: &str) -> Result<CommitId>;
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: Option<String>,
}

pub struct GitHubClient {
    client: Client,
    token: String,
    api_url: Option<String>,
}

impl GitHubClient {
    /// `api_url` overrides the base derived from the repository host.
    pub fn new(token: impl Into<String>, api_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("tipwatch/{}", VERSION))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        Ok(Self {
            client,
            token: token.into(),
            api_url: api_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    /// Each branch component is percent-encoded as its own path segment, so
    /// `/` separates components and `#`, `?` or `%` stay in the ref name.
    pub fn commit_url(&self, repo: &RepoSlug, branch: &str) -> Result<Url> {
        let base = self.api_url.clone().unwrap_or_else(|| repo.api_base());
        let invalid = || Error::config_invalid_value("api_url", Some(base.clone()), "must be a base URL");

        let mut url = Url::parse(&base).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.name.as_str(), "commits"])
            .extend(branch.split('/'));
        Ok(url)
    }
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn tip_commit(&self, repo: &RepoSlug, branch: &str) -> Result<CommitId> {
        let url = self.commit_url(repo, branch)?;
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .send()
            .await
            .map_err(Error::remote_request_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::remote_bad_status(url.as_str(), status.as_u16()));
        }

        let body = response.text().await.map_err(Error::remote_request_failed)?;
        parse_commit_payload(&body)
    }
}

/// Extract the commit hash from a commits API body.
pub fn parse_commit_payload(body: &str) -> Result<CommitId> {
    let payload: CommitResponse =
        serde_json::from_str(body).map_err(|e| Error::remote_invalid_payload(e.to_string()))?;

    let commit = CommitId::new(payload.sha.unwrap_or_default());
    if commit.is_empty() {
        return Err(Error::remote_invalid_payload("response has no sha"));
    }
    Ok(commit)
}
