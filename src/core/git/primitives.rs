use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::utils::command;

use super::remote::RepoSlug;

/// Name of the branch checked out in `repo_dir`.
pub async fn current_branch(repo_dir: &Path) -> Result<String> {
    let branch = command::run_in(
        repo_dir,
        "git",
        &["rev-parse", "--abbrev-ref", "HEAD"],
        "git rev-parse",
    )
    .await
    .map_err(|e| Error::git_command_failed(e.message))?;

    // rev-parse prints the literal "HEAD" when nothing is checked out
    if branch == "HEAD" || branch.is_empty() {
        return Err(Error::git_detached_head());
    }
    Ok(branch)
}

/// URL of the `origin` remote.
pub async fn origin_url(repo_dir: &Path) -> Result<String> {
    command::run_in(
        repo_dir,
        "git",
        &["config", "--get", "remote.origin.url"],
        "git config",
    )
    .await
    .map_err(|e| Error::git_command_failed(e.message))
}

/// Repository identity of the `origin` remote.
pub async fn origin_slug(repo_dir: &Path) -> Result<RepoSlug> {
    let url = origin_url(repo_dir).await?;
    RepoSlug::parse(&url)
}

/// Pull latest changes, aborting the pull if `cancel` fires.
///
/// Returns `Ok(false)` when the pull was cancelled.
pub async fn pull_repo(repo_dir: &Path, cancel: &CancellationToken) -> Result<bool> {
    let pulled = command::run_in_cancellable(repo_dir, "git", &["pull"], "git pull", cancel)
        .await
        .map_err(|e| Error::git_command_failed(e.message))?;
    Ok(pulled.is_some())
}
