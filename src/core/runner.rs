//! Deploy runner: pull, launch, wait, retry until done or cancelled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::git::{PullOutcome, Workspace};
use crate::process::{ProcessGroupController, ProcessTree};
use crate::state::DeployLifetime;

/// States of one runner invocation.
#[derive(Debug)]
pub enum RunnerState {
    PullingSource,
    Launching,
    Running(Arc<dyn ProcessTree>),
    RetryBackoff,
    Cancelled,
    Done,
}

/// Terminal state an invocation stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Done,
    Cancelled,
}

pub struct DeployRunner {
    workspace: Arc<dyn Workspace>,
    controller: Arc<ProcessGroupController>,
    command: String,
    retry_delay: Duration,
}

impl DeployRunner {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        controller: Arc<ProcessGroupController>,
        command: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            workspace,
            controller,
            command: command.into(),
            retry_delay,
        }
    }

    /// Drive the state machine for `lifetime` until it reaches `Done` or
    /// `Cancelled`. Failures retry without a cap; every retry pulls again.
    pub async fn run(&self, lifetime: DeployLifetime) -> RunOutcome {
        let mut attempt: u64 = 0;
        let mut state = RunnerState::PullingSource;

        loop {
            state = match state {
                RunnerState::PullingSource => {
                    attempt += 1;
                    self.pull(&lifetime, attempt).await
                }
                RunnerState::Launching => self.launch(&lifetime).await,
                RunnerState::Running(tree) => self.watch(&lifetime, tree).await,
                RunnerState::RetryBackoff => self.backoff(&lifetime).await,
                RunnerState::Cancelled => {
                    info!(
                        generation = lifetime.generation(),
                        commit = %lifetime.commit().short(),
                        "Deploy cancelled"
                    );
                    return RunOutcome::Cancelled;
                }
                RunnerState::Done => {
                    info!(
                        generation = lifetime.generation(),
                        commit = %lifetime.commit().short(),
                        attempt,
                        "Deploy finished successfully"
                    );
                    return RunOutcome::Done;
                }
            };
        }
    }

    async fn pull(&self, lifetime: &DeployLifetime, attempt: u64) -> RunnerState {
        if lifetime.is_cancelled() {
            return RunnerState::Cancelled;
        }

        info!(
            generation = lifetime.generation(),
            commit = %lifetime.commit().short(),
            attempt,
            "Starting deploy"
        );

        match self.workspace.pull(lifetime.token()).await {
            Ok(PullOutcome::Updated) => RunnerState::Launching,
            Ok(PullOutcome::Cancelled) => RunnerState::Cancelled,
            Err(_) if lifetime.is_cancelled() => RunnerState::Cancelled,
            Err(e) => {
                warn!(error = %e, code = e.code.as_str(), "git pull failed");
                RunnerState::RetryBackoff
            }
        }
    }

    async fn launch(&self, lifetime: &DeployLifetime) -> RunnerState {
        match self.controller.launch(&self.command, lifetime).await {
            Ok(tree) => RunnerState::Running(tree),
            Err(e) if e.is_cancellation() => RunnerState::Cancelled,
            Err(e) => {
                warn!(error = %e, code = e.code.as_str(), "Deploy command could not be started");
                RunnerState::RetryBackoff
            }
        }
    }

    /// The runner never kills its tree; on cancellation it steps aside and
    /// the controller's teardown reclaims the process group.
    async fn watch(&self, lifetime: &DeployLifetime, tree: Arc<dyn ProcessTree>) -> RunnerState {
        tokio::select! {
            biased;
            () = lifetime.cancelled() => RunnerState::Cancelled,
            outcome = tree.wait() => {
                if outcome.success() {
                    RunnerState::Done
                } else if lifetime.is_cancelled() {
                    RunnerState::Cancelled
                } else {
                    warn!(pid = tree.id(), %outcome, "Deploy command failed");
                    RunnerState::RetryBackoff
                }
            }
        }
    }

    async fn backoff(&self, lifetime: &DeployLifetime) -> RunnerState {
        info!(delay_secs = self.retry_delay.as_secs(), "Retrying deploy after delay");
        tokio::select! {
            biased;
            () = lifetime.cancelled() => RunnerState::Cancelled,
            () = tokio::time::sleep(self.retry_delay) => RunnerState::PullingSource,
        }
    }
}

impl fmt::Debug for DeployRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployRunner")
            .field("command", &self.command)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
