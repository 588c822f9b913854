mod primitives;
mod remote;

pub use primitives::*;
pub use remote::RepoSlug;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Outcome of a source pull that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Updated,
    Cancelled,
}

/// Local version-control collaborator.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Branch whose tip is tracked on the hosting service.
    async fn current_branch(&self) -> Result<String>;

    /// Repository identity on the hosting service.
    async fn origin(&self) -> Result<RepoSlug>;

    /// Bring the working copy up to date. Cancelling `cancel` aborts the pull.
    async fn pull(&self, cancel: &CancellationToken) -> Result<PullOutcome>;
}

/// Working copy on disk, driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    dir: PathBuf,
}

impl GitWorkspace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn current_branch(&self) -> Result<String> {
        primitives::current_branch(&self.dir).await
    }

    async fn origin(&self) -> Result<RepoSlug> {
        primitives::origin_slug(&self.dir).await
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<PullOutcome> {
        if primitives::pull_repo(&self.dir, cancel).await? {
            Ok(PullOutcome::Updated)
        } else {
            Ok(PullOutcome::Cancelled)
        }
    }
}
