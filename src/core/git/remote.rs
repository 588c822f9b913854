use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

const GITHUB_HOST: &str = "github.com";
const GITHUB_API: &str = "https://api.github.com";

// scheme://[user@]host[:port]/owner/repo[.git]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?|ssh|git)://(?:[^@/]+@)?([^/:]+)(?::\d+)?/([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .unwrap()
});

// [user@]host:owner/repo[.git]
static SCP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[^@/]+@)?([^/:]+):([\w.-]+)/([\w.-]+?)(?:\.git)?/?$").unwrap()
});

/// Repository identity on the hosting service, derived from a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let captures = URL_PATTERN
            .captures(url)
            .or_else(|| SCP_PATTERN.captures(url))
            .ok_or_else(|| Error::git_remote_unrecognized(url))?;

        Ok(Self {
            host: captures[1].to_ascii_lowercase(),
            owner: captures[2].to_string(),
            name: captures[3].to_string(),
        })
    }

    /// `owner/name`, as used in API paths.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// API base for the host: github.com maps to api.github.com, any other
    /// host is treated as GitHub Enterprise.
    pub fn api_base(&self) -> String {
        if self.host == GITHUB_HOST {
            GITHUB_API.to_string()
        } else {
            format!("https://{}/api/v3", self.host)
        }
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.name)
    }
}
