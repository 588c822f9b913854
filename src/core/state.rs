//! Process-wide supervisor state.
//!
//! Last observed commit, current deploy lifetime and active process tree
//! live behind one mutex. Critical sections are handle swaps; none of them
//! span an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::process::ProcessTree;

/// Tip commit hash as reported by the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(sha: impl Into<String>) -> Self {
        let sha = sha.into();
        Self(sha.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission for one deploy runner invocation to keep running.
///
/// Clones share the same cancellation token. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct DeployLifetime {
    generation: u64,
    commit: CommitId,
    token: CancellationToken,
}

impl DeployLifetime {
    fn new(generation: u64, commit: CommitId) -> Self {
        Self {
            generation,
            commit,
            token: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn commit(&self) -> &CommitId {
        &self.commit
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the lifetime is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// What a handover removed from the state.
#[derive(Debug, Default)]
pub struct Superseded {
    pub lifetime: Option<DeployLifetime>,
    pub tree: Option<Arc<dyn ProcessTree>>,
}

#[derive(Debug, Default)]
struct Inner {
    last_commit: Option<CommitId>,
    lifetime: Option<DeployLifetime>,
    active: Option<Arc<dyn ProcessTree>>,
    next_generation: u64,
}

impl Inner {
    fn is_current(&self, lifetime: &DeployLifetime) -> bool {
        self.lifetime
            .as_ref()
            .is_some_and(|current| current.generation == lifetime.generation)
    }
}

#[derive(Debug, Default)]
pub struct SupervisorState {
    inner: Mutex<Inner>,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves Inner consistent, so a panic in one
        // holder does not invalidate the data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_commit(&self) -> Option<CommitId> {
        self.lock().last_commit.clone()
    }

    /// Compare-then-set on the last observed commit. Returns `true` when the
    /// commit differs from the stored one and has replaced it.
    pub fn observe(&self, commit: &CommitId) -> bool {
        let mut inner = self.lock();
        if inner.last_commit.as_ref() == Some(commit) {
            return false;
        }
        inner.last_commit = Some(commit.clone());
        true
    }

    /// Cancel the current lifetime and take the active tree out of the
    /// state. After this returns, the cancelled lifetime can no longer
    /// register a tree.
    pub fn supersede(&self) -> Superseded {
        let mut inner = self.lock();
        let lifetime = inner.lifetime.take();
        if let Some(lifetime) = &lifetime {
            lifetime.cancel();
        }
        Superseded {
            lifetime,
            tree: inner.active.take(),
        }
    }

    /// Publish a fresh lifetime for `commit`. Any lifetime still current is
    /// cancelled first.
    pub fn begin(&self, commit: CommitId) -> DeployLifetime {
        let mut inner = self.lock();
        if let Some(previous) = inner.lifetime.take() {
            previous.cancel();
        }
        inner.next_generation += 1;
        let lifetime = DeployLifetime::new(inner.next_generation, commit);
        inner.lifetime = Some(lifetime.clone());
        lifetime
    }

    /// Take the tree left behind by an earlier attempt of `lifetime` so it
    /// can be reclaimed before the next one starts. Fails with a
    /// cancellation error if `lifetime` is no longer current.
    pub fn claim_stale(&self, lifetime: &DeployLifetime) -> Result<Option<Arc<dyn ProcessTree>>> {
        let mut inner = self.lock();
        if lifetime.is_cancelled() || !inner.is_current(lifetime) {
            return Err(Error::deploy_cancelled(lifetime.generation));
        }
        Ok(inner.active.take())
    }

    /// Make `tree` the active tree of `lifetime`, unless the lifetime was
    /// superseded in the meantime.
    pub fn register_tree(&self, lifetime: &DeployLifetime, tree: Arc<dyn ProcessTree>) -> Result<()> {
        let mut inner = self.lock();
        if lifetime.is_cancelled() || !inner.is_current(lifetime) {
            return Err(Error::deploy_cancelled(lifetime.generation));
        }
        debug_assert!(inner.active.is_none(), "active tree registered twice");
        inner.active = Some(tree);
        Ok(())
    }

    /// Put back a tree whose teardown failed, so the next teardown or
    /// shutdown tries again.
    pub fn restore_tree(&self, tree: Arc<dyn ProcessTree>) {
        let mut inner = self.lock();
        debug_assert!(inner.active.is_none(), "restoring over a live tree");
        inner.active = Some(tree);
    }

    pub fn active_tree(&self) -> Option<Arc<dyn ProcessTree>> {
        self.lock().active.clone()
    }

    pub fn current_lifetime(&self) -> Option<DeployLifetime> {
        self.lock().lifetime.clone()
    }
}
