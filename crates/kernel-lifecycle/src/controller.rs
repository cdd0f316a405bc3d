use std::sync::Arc;
use std::time::Duration;

use kernel_protocol::defaults::DEFAULT_PLACEMENT_TIMEOUT;
use kernel_protocol::{
    KernelError, KernelResult, LaunchedWorker, Placement, WorkerExit, WorkerHandle, WorkerId,
    WorkerLauncher, WorkerSpawnSpec,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLifecycleConfig {
    pub spawn_spec: WorkerSpawnSpec,
    pub placement_timeout: Duration,
}

impl Default for WorkerLifecycleConfig {
    fn default() -> Self {
        Self {
            spawn_spec: WorkerSpawnSpec::default(),
            placement_timeout: DEFAULT_PLACEMENT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    WorkerTerminated { worker_id: WorkerId, exit: WorkerExit },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerLifecyclePerfSnapshot {
    pub spawn_requests_total: u64,
    pub spawn_success_total: u64,
    pub spawn_failures_total: u64,
    pub terminations_observed_total: u64,
    pub teardowns_total: u64,
}

struct ActiveWorker {
    handle: Arc<dyn WorkerHandle>,
    placement: Placement,
    watcher: JoinHandle<()>,
}

/// Owns the one live worker. Never shared: the supervisor loop holds it by
/// value and is the only caller.
pub struct WorkerLifecycle {
    launcher: Arc<dyn WorkerLauncher>,
    config: WorkerLifecycleConfig,
    active: Option<ActiveWorker>,
    perf: WorkerLifecyclePerfSnapshot,
}

impl WorkerLifecycle {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: WorkerLifecycleConfig) -> Self {
        Self {
            launcher,
            config,
            active: None,
            perf: WorkerLifecyclePerfSnapshot::default(),
        }
    }

    pub fn current(&self) -> Option<&Arc<dyn WorkerHandle>> {
        self.active.as_ref().map(|active| &active.handle)
    }

    pub fn current_id(&self) -> Option<&WorkerId> {
        self.current().map(|handle| handle.id())
    }

    pub fn perf_snapshot(&self) -> WorkerLifecyclePerfSnapshot {
        self.perf
    }

    /// Acquire a placement and launch a worker on it. Any worker already
    /// held is torn down first.
    pub async fn spawn(
        &mut self,
        events: mpsc::UnboundedSender<LifecycleEvent>,
    ) -> KernelResult<WorkerId> {
        self.teardown().await;
        self.perf.spawn_requests_total += 1;

        let placement = match tokio::time::timeout(
            self.config.placement_timeout,
            self.launcher.acquire_placement(),
        )
        .await
        {
            Ok(Ok(placement)) => placement,
            Ok(Err(error)) => {
                self.perf.spawn_failures_total += 1;
                return Err(error);
            }
            Err(_) => {
                self.perf.spawn_failures_total += 1;
                return Err(KernelError::PlacementTimeout(self.config.placement_timeout));
            }
        };

        let LaunchedWorker { handle, exit } = match self
            .launcher
            .launch(&placement, self.config.spawn_spec.clone())
            .await
        {
            Ok(launched) => launched,
            Err(error) => {
                self.perf.spawn_failures_total += 1;
                if let Err(release_error) = self.launcher.release_placement(&placement).await {
                    tracing::warn!(
                        placement = placement.id.as_str(),
                        error = %release_error,
                        "failed to release placement after launch failure"
                    );
                }
                return Err(error);
            }
        };

        let worker_id = handle.id().clone();
        let watcher = spawn_termination_watcher(worker_id.clone(), exit, events);
        tracing::info!(
            worker_id = %worker_id,
            placement = placement.id.as_str(),
            "kernel worker spawned"
        );

        self.active = Some(ActiveWorker {
            handle,
            placement,
            watcher,
        });
        self.perf.spawn_success_total += 1;
        Ok(worker_id)
    }

    /// Discard the current worker, if any, and bring up a fresh one. Routes
    /// still waiting on the old worker get nothing more from it.
    pub async fn replace(
        &mut self,
        events: mpsc::UnboundedSender<LifecycleEvent>,
    ) -> KernelResult<WorkerId> {
        if let Some(previous) = self.current_id() {
            tracing::info!(worker_id = %previous, "replacing kernel worker");
        }
        self.spawn(events).await
    }

    /// Record a termination notice. Returns true when it concerns the
    /// worker currently held, i.e. a replacement is needed.
    pub fn observe_termination(&mut self, worker_id: &WorkerId) -> bool {
        if self.current_id() != Some(worker_id) {
            return false;
        }
        self.perf.terminations_observed_total += 1;
        true
    }

    /// Terminate the worker and release its placement. Safe to call
    /// repeatedly and before any spawn.
    pub async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.watcher.abort();

        let worker_id = active.handle.id().clone();
        if let Err(error) = active.handle.terminate().await {
            tracing::warn!(
                worker_id = %worker_id,
                error = %error,
                "failed to terminate kernel worker"
            );
        }
        if let Err(error) = self.launcher.release_placement(&active.placement).await {
            tracing::warn!(
                worker_id = %worker_id,
                placement = active.placement.id.as_str(),
                error = %error,
                "failed to release worker placement"
            );
        }
        self.perf.teardowns_total += 1;
        tracing::info!(worker_id = %worker_id, "kernel worker torn down");
    }
}

fn spawn_termination_watcher(
    worker_id: WorkerId,
    exit: tokio::sync::oneshot::Receiver<WorkerExit>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let exit = exit
            .await
            .unwrap_or_else(|_| WorkerExit::Unknown("exit signal dropped".to_owned()));
        tracing::warn!(worker_id = %worker_id, exit = %exit, "kernel worker terminated");
        let _ = events.send(LifecycleEvent::WorkerTerminated { worker_id, exit });
    })
}
