use std::sync::Arc;
use std::time::Duration;

use kernel_channels::{ChannelBinder, KernelChannels};
use kernel_lifecycle::{
    LifecycleEvent, WorkerLifecycle, WorkerLifecycleConfig, WorkerLifecyclePerfSnapshot,
};
use kernel_protocol::defaults::{
    DEFAULT_CHANNEL_BIND_TIMEOUT, DEFAULT_RESPAWN_ATTEMPTS, DEFAULT_RESPAWN_BACKOFF,
};
use kernel_protocol::{
    ExecutionState, KernelResult, MessageContent, OrphanPolicy, OutboundMessage, Request,
    RouteAddress, RouteId, SessionIdentity, WorkerCommand, WorkerId, WorkerLauncher,
};
use tokio::sync::{mpsc, watch};

use crate::handle::{SupervisorCommand, SupervisorHandle};
use crate::route::{ResponseRoute, RouteKind, RouteOutcome};
use crate::state::SupervisorState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub lifecycle: WorkerLifecycleConfig,
    pub channel_bind_timeout: Duration,
    pub respawn_attempts: u32,
    pub respawn_backoff: Duration,
    pub orphan_policy: OrphanPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            lifecycle: WorkerLifecycleConfig::default(),
            channel_bind_timeout: DEFAULT_CHANNEL_BIND_TIMEOUT,
            respawn_attempts: DEFAULT_RESPAWN_ATTEMPTS,
            respawn_backoff: DEFAULT_RESPAWN_BACKOFF,
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSnapshot {
    pub state: SupervisorState,
    pub worker_id: Option<WorkerId>,
    pub current_route: Option<RouteId>,
    pub routes_created: u64,
    pub lifecycle: WorkerLifecyclePerfSnapshot,
}

/// Single task owning the worker and the current-operation slot. Everything
/// else talks to it through [`SupervisorHandle`].
pub struct Supervisor {
    state: watch::Sender<SupervisorState>,
    lifecycle: WorkerLifecycle,
    channels: KernelChannels,
    respawn_attempts: u32,
    respawn_backoff: Duration,
    orphan_policy: OrphanPolicy,
    current_route: Option<RouteId>,
    next_route_id: u64,
    lifecycle_events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    lifecycle_events: mpsc::UnboundedReceiver<LifecycleEvent>,
    route_exits_tx: mpsc::UnboundedSender<RouteId>,
    route_exits: mpsc::UnboundedReceiver<RouteId>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
}

impl Supervisor {
    /// Spawn the first worker, wait for both outbound channels, then start
    /// serving. Either wait timing out is fatal and leaves nothing running.
    pub async fn start(
        launcher: Arc<dyn WorkerLauncher>,
        binder: &ChannelBinder,
        config: SupervisorConfig,
    ) -> KernelResult<SupervisorHandle> {
        let SupervisorConfig {
            lifecycle: lifecycle_config,
            channel_bind_timeout,
            respawn_attempts,
            respawn_backoff,
            orphan_policy,
        } = config;

        let (state, state_rx) = watch::channel(SupervisorState::Initializing);
        let (lifecycle_events_tx, lifecycle_events) = mpsc::unbounded_channel();
        let mut lifecycle = WorkerLifecycle::new(launcher, lifecycle_config);
        let worker_id = lifecycle.spawn(lifecycle_events_tx.clone()).await?;

        let channels = match binder.wait_bound(channel_bind_timeout).await {
            Ok(channels) => channels,
            Err(error) => {
                tracing::warn!(
                    worker_id = %worker_id,
                    error = %error,
                    "kernel supervisor startup aborted"
                );
                lifecycle.teardown().await;
                return Err(error);
            }
        };

        let (route_exits_tx, route_exits) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        state.send_replace(SupervisorState::Ready);
        let supervisor = Self {
            state,
            lifecycle,
            channels,
            respawn_attempts: respawn_attempts.max(1),
            respawn_backoff,
            orphan_policy,
            current_route: None,
            next_route_id: 1,
            lifecycle_events_tx,
            lifecycle_events,
            route_exits_tx,
            route_exits,
            commands,
        };

        tracing::info!(worker_id = %worker_id, "kernel supervisor ready");
        let task = tokio::spawn(supervisor.run());
        Ok(SupervisorHandle::new(commands_tx, state_rx, task))
    }

    async fn run(mut self) -> KernelResult<()> {
        let result = loop {
            tokio::select! {
                biased;
                Some(event) = self.lifecycle_events.recv() => {
                    if let Err(error) = self.on_lifecycle_event(event).await {
                        break Err(error);
                    }
                }
                Some(route_id) = self.route_exits.recv() => {
                    self.on_route_exit(route_id);
                }
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Shutdown) | None => break Ok(()),
                    Some(command) => {
                        if let Err(error) = self.on_command(command).await {
                            break Err(error);
                        }
                    }
                },
            }
        };

        self.lifecycle.teardown().await;
        self.state.send_replace(SupervisorState::Terminated);
        match &result {
            Ok(()) => tracing::info!("kernel supervisor shut down"),
            Err(error) => tracing::error!(error = %error, "kernel supervisor stopped"),
        }
        result
    }

    async fn on_command(&mut self, command: SupervisorCommand) -> KernelResult<()> {
        match command {
            SupervisorCommand::Session { identity, request } => {
                self.dispatch(identity, request).await;
            }
            SupervisorCommand::Interrupt => self.interrupt().await,
            SupervisorCommand::Restart => {
                tracing::info!("kernel restart requested");
                self.respawn().await?;
            }
            SupervisorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SupervisorCommand::Shutdown => {}
        }
        Ok(())
    }

    async fn on_lifecycle_event(&mut self, event: LifecycleEvent) -> KernelResult<()> {
        match event {
            LifecycleEvent::WorkerTerminated { worker_id, exit } => {
                if !self.lifecycle.observe_termination(&worker_id) {
                    tracing::debug!(
                        worker_id = %worker_id,
                        "ignoring termination of a retired worker"
                    );
                    return Ok(());
                }
                tracing::warn!(
                    worker_id = %worker_id,
                    exit = %exit,
                    "kernel worker crashed; respawning"
                );
                self.respawn().await
            }
        }
    }

    /// A route that finished only clears the slot if nothing newer took it.
    fn on_route_exit(&mut self, route_id: RouteId) {
        if self.current_route == Some(route_id) {
            self.current_route = None;
        }
    }

    async fn dispatch(&mut self, identity: SessionIdentity, request: Request) {
        let route_id = self.allocate_route_id();
        let kind = RouteKind::for_request(&request);

        if let Request::Execute { counter, code } = &request {
            self.emit(&identity, MessageContent::status(ExecutionState::Busy));
            self.emit(
                &identity,
                MessageContent::Pyin {
                    execution_count: *counter,
                    code: code.clone(),
                },
            );
        }

        let (mailbox, inbox) = mpsc::unbounded_channel();
        let route = ResponseRoute::new(
            route_id,
            kind,
            identity,
            self.channels.clone(),
            self.orphan_policy,
        );
        let exits = self.route_exits_tx.clone();
        tokio::spawn(async move {
            if route.run(inbox).await == RouteOutcome::Orphaned {
                tracing::debug!(route_id = %route_id, "route ended without a terminal response");
            }
            let _ = exits.send(route_id);
        });
        self.current_route = Some(route_id);

        let Some(worker) = self.lifecycle.current().cloned() else {
            tracing::warn!(route_id = %route_id, "no kernel worker to deliver request to");
            return;
        };
        tracing::debug!(
            route_id = %route_id,
            worker_id = %worker.id(),
            kind = ?kind,
            "forwarding session request"
        );
        let command = WorkerCommand::Request {
            route: RouteAddress {
                id: route_id,
                mailbox,
            },
            request,
        };
        if let Err(error) = worker.deliver(command).await {
            tracing::warn!(
                route_id = %route_id,
                error = %error,
                "failed to forward session request"
            );
        }
    }

    async fn interrupt(&mut self) {
        let Some(origin) = self.current_route else {
            tracing::debug!("interrupt ignored; no current operation");
            return;
        };
        let Some(worker) = self.lifecycle.current().cloned() else {
            return;
        };
        tracing::info!(
            route_id = %origin,
            worker_id = %worker.id(),
            "interrupting current operation"
        );
        if let Err(error) = worker.deliver(WorkerCommand::Interrupt { origin }).await {
            tracing::warn!(route_id = %origin, error = %error, "failed to deliver interrupt");
        }
    }

    /// Replace the worker, retrying with a fixed backoff. The slot is left
    /// alone: it names a route, not a worker.
    async fn respawn(&mut self) -> KernelResult<()> {
        let mut attempt = 1;
        loop {
            match self.lifecycle.replace(self.lifecycle_events_tx.clone()).await {
                Ok(worker_id) => {
                    tracing::info!(worker_id = %worker_id, attempt, "kernel worker replaced");
                    return Ok(());
                }
                Err(error) if attempt < self.respawn_attempts => {
                    tracing::warn!(
                        attempt,
                        error = %error,
                        "kernel worker respawn failed; retrying"
                    );
                    tokio::time::sleep(self.respawn_backoff).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        attempt,
                        error = %error,
                        "kernel worker respawn failed; giving up"
                    );
                    return Err(error);
                }
            }
        }
    }

    fn allocate_route_id(&mut self) -> RouteId {
        let id = self.next_route_id;
        self.next_route_id = id.checked_add(1).expect("route id space exhausted");
        RouteId::new(id)
    }

    fn emit(&self, identity: &SessionIdentity, content: MessageContent) {
        self.channels
            .emit(OutboundMessage::new(identity.clone(), content));
    }

    fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            state: *self.state.borrow(),
            worker_id: self.lifecycle.current_id().cloned(),
            current_route: self.current_route,
            routes_created: self.next_route_id - 1,
            lifecycle: self.lifecycle.perf_snapshot(),
        }
    }
}
