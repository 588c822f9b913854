//! In-memory stand-ins for the supervisor's collaborators.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::git::{PullOutcome, RepoSlug, Workspace};
use crate::github::CommitSource;
use crate::process::{ExitOutcome, ProcessSpawner, ProcessTree};
use crate::state::CommitId;

/// Ordered record of side effects across fakes ("pull", "launch:<cmd>",
/// "kill:<pid>").
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

#[derive(Debug)]
pub struct FakeTree {
    pid: u32,
    killable: AtomicBool,
    signals: AtomicUsize,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    log: EventLog,
}

impl FakeTree {
    fn build(pid: u32, killable: bool, exit: Option<ExitOutcome>, log: EventLog) -> Arc<Self> {
        let (exit_tx, exit_rx) = watch::channel(exit);
        Arc::new(Self {
            pid,
            killable: AtomicBool::new(killable),
            signals: AtomicUsize::new(0),
            exit_tx,
            exit_rx,
            log,
        })
    }

    /// Runs until killed.
    pub fn running(pid: u32) -> Arc<Self> {
        Self::build(pid, true, None, EventLog::default())
    }

    /// Leader already exited.
    pub fn exited(pid: u32, success: bool) -> Arc<Self> {
        let outcome = if success {
            ExitOutcome::Success
        } else {
            ExitOutcome::Code(1)
        };
        Self::build(pid, true, Some(outcome), EventLog::default())
    }

    /// Refuses signals, as if owned by another user.
    pub fn unkillable(pid: u32) -> Arc<Self> {
        Self::build(pid, false, None, EventLog::default())
    }

    pub fn finish(&self, outcome: ExitOutcome) {
        self.exit_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    /// Let later kills through, as if ownership had been fixed.
    pub fn allow_kill(&self) {
        self.killable.store(true, Ordering::SeqCst);
    }

    pub fn signals(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }
}

#[async_trait]
impl ProcessTree for FakeTree {
    fn id(&self) -> u32 {
        self.pid
    }

    fn terminate_all(&self) -> Result<()> {
        if !self.killable.load(Ordering::SeqCst) {
            return Err(Error::deploy_signal_failed(self.pid as i32, "Operation not permitted"));
        }
        self.signals.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("kill:{}", self.pid));
        self.finish(ExitOutcome::Signal(9));
        Ok(())
    }

    async fn wait(&self) -> ExitOutcome {
        let mut rx = self.exit_rx.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|o| (*o).clone())
            .ok()
            .flatten();
        outcome.unwrap_or_else(|| ExitOutcome::WaitFailed("sender dropped".to_string()))
    }
}

/// What the next spawn should produce.
#[derive(Debug, Clone)]
pub enum Spawn {
    /// Keeps running until killed.
    Run,
    /// Keeps running and refuses every kill.
    Unkillable,
    /// Exits on its own right away.
    Exit(ExitOutcome),
    /// The OS refuses to start the process.
    Fail,
}

#[derive(Debug, Default)]
pub struct FakeSpawner {
    script: Mutex<VecDeque<Spawn>>,
    trees: Mutex<Vec<Arc<FakeTree>>>,
    commands: Mutex<Vec<String>>,
    next_pid: AtomicUsize,
    log: EventLog,
}

impl FakeSpawner {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn script(&self, spawns: impl IntoIterator<Item = Spawn>) {
        self.script.lock().unwrap().extend(spawns);
    }

    pub fn trees(&self) -> Vec<Arc<FakeTree>> {
        self.trees.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, command: &str, _dir: &Path) -> Result<Arc<dyn ProcessTree>> {
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Spawn::Run);
        self.log.push(format!("launch:{}", command));
        self.commands.lock().unwrap().push(command.to_string());

        if matches!(next, Spawn::Fail) {
            return Err(Error::deploy_spawn_failed(command, "No such file or directory"));
        }

        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst) as u32;
        let killable = !matches!(next, Spawn::Unkillable);
        let tree = FakeTree::build(pid, killable, None, self.log.clone());
        if let Spawn::Exit(outcome) = next {
            tree.finish(outcome);
        }
        self.trees.lock().unwrap().push(Arc::clone(&tree));
        Ok(tree as Arc<dyn ProcessTree>)
    }
}

#[derive(Debug)]
pub struct FakeWorkspace {
    branch: Mutex<Result<String>>,
    pulls: Mutex<VecDeque<Result<()>>>,
    pull_blocks: bool,
    log: EventLog,
}

impl FakeWorkspace {
    pub fn new(log: EventLog) -> Self {
        Self {
            branch: Mutex::new(Ok("main".to_string())),
            pulls: Mutex::new(VecDeque::new()),
            pull_blocks: false,
            log,
        }
    }

    /// Pulls never finish on their own; only cancellation ends them.
    pub fn hanging(log: EventLog) -> Self {
        Self {
            pull_blocks: true,
            ..Self::new(log)
        }
    }

    pub fn fail_branch(&self, err: Error) {
        *self.branch.lock().unwrap() = Err(err);
    }

    pub fn script_pulls(&self, results: impl IntoIterator<Item = Result<()>>) {
        self.pulls.lock().unwrap().extend(results);
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    async fn current_branch(&self) -> Result<String> {
        self.branch.lock().unwrap().clone()
    }

    async fn origin(&self) -> Result<RepoSlug> {
        RepoSlug::parse("git@github.com:acme/storefront.git")
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<PullOutcome> {
        if cancel.is_cancelled() {
            return Ok(PullOutcome::Cancelled);
        }
        self.log.push("pull");
        if self.pull_blocks {
            cancel.cancelled().await;
            return Ok(PullOutcome::Cancelled);
        }
        let next = self.pulls.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next.map(|()| PullOutcome::Updated)
    }
}

/// Serves scripted tip commits; repeats the last answer once the script
/// runs out.
#[derive(Debug, Default)]
pub struct FakeSource {
    answers: Mutex<VecDeque<Result<CommitId>>>,
    last: Mutex<Option<Result<CommitId>>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn answer(&self, result: Result<CommitId>) {
        self.answers.lock().unwrap().push_back(result);
    }

    pub fn answer_sha(&self, sha: &str) {
        self.answer(Ok(CommitId::new(sha)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitSource for FakeSource {
    async fn tip_commit(&self, _repo: &RepoSlug, _branch: &str) -> Result<CommitId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(answer) => {
                *last = Some(answer.clone());
                answer
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(Error::remote_request_failed("no scripted answer"))),
        }
    }
}
