//! Supervisor loop: poll on a fixed period, hand over on every change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detector::ChangeDetector;
use crate::process::ProcessGroupController;
use crate::runner::{DeployRunner, RunOutcome};
use crate::state::{CommitId, SupervisorState};

pub struct Supervisor {
    state: Arc<SupervisorState>,
    detector: ChangeDetector,
    controller: Arc<ProcessGroupController>,
    runner: Arc<DeployRunner>,
    poll_interval: Duration,
    // Held from the tick that detected a change until the new lifetime is
    // published. Acquired in tick order.
    handover: Arc<AsyncMutex<()>>,
}

impl Supervisor {
    pub fn new(
        state: Arc<SupervisorState>,
        detector: ChangeDetector,
        controller: Arc<ProcessGroupController>,
        runner: Arc<DeployRunner>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            detector,
            controller,
            runner,
            poll_interval,
            handover: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Tick until `shutdown` fires, then tear down the active deployment.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(poll_secs = self.poll_interval.as_secs(), "Supervisor started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Shutdown requested, stopping active deployment");

        // Let an in-flight handover publish first so its lifetime is the one
        // cancelled below.
        let _guard = self.handover.lock().await;
        if let Err(e) = self.controller.shutdown().await {
            error!(error = %e, code = e.code.as_str(), "Failed to stop active deployment");
        }
    }

    /// One detection cycle. Returns the spawned deploy task when a change
    /// was detected.
    pub async fn tick(&self) -> Option<JoinHandle<RunOutcome>> {
        let observation = match self.detector.poll().await {
            Ok(observation) => observation,
            Err(e) => {
                warn!(error = %e, code = e.code.as_str(), "Poll failed, skipping cycle");
                return None;
            }
        };

        if !observation.changed {
            debug!(commit = %observation.commit.short(), "No new commit");
            return None;
        }

        info!(commit = %observation.commit.short(), "New commit detected");
        let guard = Arc::clone(&self.handover).lock_owned().await;
        Some(self.hand_over(observation.commit, guard))
    }

    fn hand_over(&self, commit: CommitId, guard: tokio::sync::OwnedMutexGuard<()>) -> JoinHandle<RunOutcome> {
        let state = Arc::clone(&self.state);
        let controller = Arc::clone(&self.controller);
        let runner = Arc::clone(&self.runner);

        tokio::spawn(async move {
            // On failure the old tree stays tracked; the new runner's launch
            // retries reclaiming it before anything new is spawned.
            if let Err(e) = controller.supersede().await {
                error!(error = %e, code = e.code.as_str(), "Teardown of previous deployment failed");
            }

            let lifetime = state.begin(commit);
            drop(guard);
            runner.run(lifetime).await
        })
    }
}
