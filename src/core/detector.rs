use std::sync::Arc;

use crate::error::Result;
use crate::git::Workspace;
use crate::github::CommitSource;
use crate::state::{CommitId, SupervisorState};

/// Result of one successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub commit: CommitId,
    pub changed: bool,
}

/// Resolves the tracked branch's tip and compares it with the last
/// observed commit.
pub struct ChangeDetector {
    workspace: Arc<dyn Workspace>,
    source: Arc<dyn CommitSource>,
    state: Arc<SupervisorState>,
}

impl ChangeDetector {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        source: Arc<dyn CommitSource>,
        state: Arc<SupervisorState>,
    ) -> Self {
        Self {
            workspace,
            source,
            state,
        }
    }

    /// Any error means the cycle is skipped; lastCommit is only touched
    /// when the remote tip differs from it.
    pub async fn poll(&self) -> Result<Observation> {
        let branch = self.workspace.current_branch().await?;
        let repo = self.workspace.origin().await?;
        let commit = self.source.tip_commit(&repo, &branch).await?;
        let changed = self.state.observe(&commit);
        Ok(Observation { commit, changed })
    }
}
