//! Process group controller.
//!
//! A deploy command runs as the leader of its own process group, so one
//! group-directed SIGKILL reaches every descendant it forks, including
//! servers the supervisor never learns about individually.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::state::{DeployLifetime, SupervisorState};
use crate::utils::command;

/// How a process tree's leader ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Code(i32),
    Signal(i32),
    WaitFailed(String),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if status.success() {
            ExitOutcome::Success
        } else if let Some(code) = status.code() {
            ExitOutcome::Code(code)
        } else if let Some(signal) = status.signal() {
            ExitOutcome::Signal(signal)
        } else {
            ExitOutcome::WaitFailed(format!("unrecognized exit status {}", status))
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "exit status 0"),
            ExitOutcome::Code(code) => write!(f, "exit status {}", code),
            ExitOutcome::Signal(signal) => write!(f, "killed by signal {}", signal),
            ExitOutcome::WaitFailed(reason) => write!(f, "wait failed: {}", reason),
        }
    }
}

/// A leader process plus every descendant, addressable as one unit.
#[async_trait]
pub trait ProcessTree: Send + Sync + fmt::Debug {
    /// Leader pid, which is also the process group id.
    fn id(&self) -> u32;

    /// Unmaskable kill of the whole group. A group that is already gone
    /// counts as success.
    fn terminate_all(&self) -> Result<()>;

    /// Resolves once the leader has exited and been reaped.
    async fn wait(&self) -> ExitOutcome;
}

/// Starts deploy commands as process trees.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &str, dir: &std::path::Path) -> Result<Arc<dyn ProcessTree>>;
}

/// Process group on this host, led by a `<shell> -c` process.
#[derive(Debug)]
pub struct OsProcessTree {
    pid: u32,
    exited: watch::Receiver<Option<ExitOutcome>>,
    // Set by the reaper when no member of the group outlived the leader.
    // The pgid is free for reuse from then on and must not be signalled.
    released: Arc<AtomicBool>,
}

impl OsProcessTree {
    fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    /// Whether the group was already empty when its leader was reaped.
    pub fn group_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// True when signal 0 finds no process left in group `pgid`.
fn group_is_empty(pgid: libc::pid_t) -> bool {
    // SAFETY: killpg only reads its two integer arguments.
    let rc = unsafe { libc::killpg(pgid, 0) };
    rc != 0 && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

#[async_trait]
impl ProcessTree for OsProcessTree {
    fn id(&self) -> u32 {
        self.pid
    }

    fn terminate_all(&self) -> Result<()> {
        let pgid = self.pid as libc::pid_t;
        if self.group_released() {
            debug!(pgid, "Process group already empty, nothing to kill");
            return Ok(());
        }

        // SAFETY: killpg only reads its two integer arguments.
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(()),
            // Some kernels answer EPERM for a group left with only zombies
            Some(libc::EPERM) if self.has_exited() => Ok(()),
            _ => Err(Error::deploy_signal_failed(pgid, err)),
        }
    }

    async fn wait(&self) -> ExitOutcome {
        let mut exited = self.exited.clone();
        let outcome = match exited.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| ExitOutcome::WaitFailed("missing exit status".to_string())),
            Err(_) => ExitOutcome::WaitFailed("reaper task ended without a status".to_string()),
        };
        outcome
    }
}

/// Spawns `<shell> -c <command>` as the leader of a new process group and
/// forwards its output into the log.
#[derive(Debug, Clone)]
pub struct ShellSpawner {
    shell: String,
}

impl ShellSpawner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn start(&self, cmd: &str, dir: &std::path::Path) -> Result<Arc<OsProcessTree>> {
        let mut child = command::shell_command(&self.shell, cmd, dir)
            .process_group(0)
            .spawn()
            .map_err(|e| Error::deploy_spawn_failed(cmd, e))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::deploy_spawn_failed(cmd, "process exited before its pid was read"))?;

        if let Some(stdout) = child.stdout.take() {
            command::forward_lines(stdout, "stdout", pid);
        }
        if let Some(stderr) = child.stderr.take() {
            command::forward_lines(stderr, "stderr", pid);
        }

        let (tx, rx) = watch::channel(None);
        let released = Arc::new(AtomicBool::new(false));
        let reaper_released = Arc::clone(&released);
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from_status(status),
                Err(e) => ExitOutcome::WaitFailed(e.to_string()),
            };
            if group_is_empty(pid as libc::pid_t) {
                reaper_released.store(true, Ordering::SeqCst);
            }
            debug!(pid, %outcome, "Deploy process reaped");
            let _ = tx.send(Some(outcome));
        });

        info!(pid, shell = %self.shell, "Deploy process started");
        Ok(Arc::new(OsProcessTree {
            pid,
            exited: rx,
            released,
        }))
    }
}

impl ProcessSpawner for ShellSpawner {
    fn spawn(&self, cmd: &str, dir: &std::path::Path) -> Result<Arc<dyn ProcessTree>> {
        Ok(self.start(cmd, dir)? as Arc<dyn ProcessTree>)
    }
}

/// Owns the lifecycle of the single active deploy process tree.
pub struct ProcessGroupController {
    state: Arc<SupervisorState>,
    spawner: Arc<dyn ProcessSpawner>,
    dir: PathBuf,
    port_release_pause: Duration,
    // Serializes everything that takes a tree out of the state, reclaims it,
    // or registers a new one.
    reclaim: AsyncMutex<()>,
}

impl ProcessGroupController {
    pub fn new(
        state: Arc<SupervisorState>,
        spawner: Arc<dyn ProcessSpawner>,
        dir: impl Into<PathBuf>,
        port_release_pause: Duration,
    ) -> Self {
        Self {
            state,
            spawner,
            dir: dir.into(),
            port_release_pause,
            reclaim: AsyncMutex::new(()),
        }
    }

    /// Kill the whole previous tree, reap its leader, then pause so the
    /// kernel can release ports the tree held. No tree means no signal.
    pub async fn teardown(&self, prev: Option<Arc<dyn ProcessTree>>) -> Result<()> {
        self.reclaim(prev, self.port_release_pause).await
    }

    /// Cancel the current lifetime and tear down its tree. A tree that
    /// cannot be killed goes back into the state, so no later launch starts
    /// next to it and the next teardown or shutdown retries it.
    pub async fn supersede(&self) -> Result<()> {
        let _guard = self.reclaim.lock().await;
        let superseded = self.state.supersede();
        if let Some(previous) = &superseded.lifetime {
            debug!(generation = previous.generation(), "Cancelled previous deploy lifetime");
        }
        self.reclaim_or_restore(superseded.tree, self.port_release_pause)
            .await
    }

    /// Tear down whatever is active without the port-release pause. Used on
    /// supervisor shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.reclaim.lock().await;
        let superseded = self.state.supersede();
        self.reclaim_or_restore(superseded.tree, Duration::ZERO).await
    }

    async fn reclaim_or_restore(&self, prev: Option<Arc<dyn ProcessTree>>, pause: Duration) -> Result<()> {
        let Some(tree) = prev else {
            return Ok(());
        };
        if let Err(e) = self.reclaim(Some(Arc::clone(&tree)), pause).await {
            warn!(pid = tree.id(), error = %e, "Process group survived teardown, keeping it tracked");
            self.state.restore_tree(tree);
            return Err(e);
        }
        Ok(())
    }

    async fn reclaim(&self, prev: Option<Arc<dyn ProcessTree>>, pause: Duration) -> Result<()> {
        let Some(tree) = prev else {
            return Ok(());
        };

        let pid = tree.id();
        info!(pid, "Killing previous deploy process group");
        tree.terminate_all()?;

        let outcome = tree.wait().await;
        debug!(pid, %outcome, "Previous deploy process exited");

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(())
    }

    /// Start `command` as a new process tree owned by `lifetime` and make it
    /// the active tree.
    ///
    /// A tree left by an earlier attempt of the same lifetime is torn down
    /// first, pause included. Fails with a cancellation error, leaving
    /// nothing running, if the lifetime has been superseded.
    pub async fn launch(&self, command: &str, lifetime: &DeployLifetime) -> Result<Arc<dyn ProcessTree>> {
        let _guard = self.reclaim.lock().await;

        let stale = self.state.claim_stale(lifetime)?;
        if let Some(stale) = &stale {
            debug!(pid = stale.id(), "Sweeping process group of previous attempt");
        }
        self.reclaim_or_restore(stale, self.port_release_pause).await?;

        if lifetime.is_cancelled() {
            return Err(Error::deploy_cancelled(lifetime.generation()));
        }

        let tree = self.spawner.spawn(command, &self.dir)?;
        if let Err(e) = self.state.register_tree(lifetime, Arc::clone(&tree)) {
            debug!(pid = tree.id(), "Lifetime cancelled during launch, stopping new process group");
            self.reclaim_or_restore(Some(tree), Duration::ZERO).await?;
            return Err(e);
        }
        Ok(tree)
    }
}

impl fmt::Debug for ProcessGroupController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroupController")
            .field("dir", &self.dir)
            .field("port_release_pause", &self.port_release_pause)
            .finish_non_exhaustive()
    }
}
