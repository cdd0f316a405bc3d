use std::sync::Arc;

use kernel_protocol::{KernelError, KernelResult, Request, SessionIdentity};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::state::SupervisorState;
use crate::supervisor::SupervisorSnapshot;

pub(crate) enum SupervisorCommand {
    Session {
        identity: SessionIdentity,
        request: Request,
    },
    Interrupt,
    Restart,
    Shutdown,
    Snapshot {
        reply: oneshot::Sender<SupervisorSnapshot>,
    },
}

/// Inbound control surface of a running supervisor. Cheap to clone; every
/// clone feeds the same loop.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    state: watch::Receiver<SupervisorState>,
    task: Arc<Mutex<Option<JoinHandle<KernelResult<()>>>>>,
}

impl SupervisorHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<SupervisorCommand>,
        state: watch::Receiver<SupervisorState>,
        task: JoinHandle<KernelResult<()>>,
    ) -> Self {
        Self {
            commands,
            state,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn session_request(&self, identity: SessionIdentity, request: Request) -> KernelResult<()> {
        self.send(SupervisorCommand::Session { identity, request })
    }

    /// Decode and submit a client message. Anything that is not one of the
    /// known request types is logged and dropped; the supervisor never sees it.
    pub fn submit_wire(
        &self,
        identity: SessionIdentity,
        msg_type: &str,
        content: &Value,
    ) -> KernelResult<()> {
        match Request::from_wire(msg_type, content) {
            Ok(request) => self.session_request(identity, request),
            Err(error) => {
                tracing::warn!(msg_type, error = %error, "dropping unrecognized session request");
                Ok(())
            }
        }
    }

    pub fn interrupt(&self) -> KernelResult<()> {
        self.send(SupervisorCommand::Interrupt)
    }

    pub fn restart(&self) -> KernelResult<()> {
        self.send(SupervisorCommand::Restart)
    }

    pub fn shutdown(&self) -> KernelResult<()> {
        self.send(SupervisorCommand::Shutdown)
    }

    pub async fn snapshot(&self) -> KernelResult<SupervisorSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(SupervisorCommand::Snapshot { reply })?;
        response.await.map_err(|_| KernelError::SupervisorStopped)
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.state().is_terminal() && !self.commands.is_closed()
    }

    /// Resolves once the loop has torn the worker down and stopped, whether
    /// by request or because it gave up respawning.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|state| state.is_terminal()).await;
    }

    /// Wait for the loop to exit. Only the first caller sees its outcome;
    /// later calls return `Ok(())` immediately.
    pub async fn join(&self) -> KernelResult<()> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        task.await.map_err(|error| {
            KernelError::Internal(format!("kernel supervisor task failed: {error}"))
        })?
    }

    fn send(&self, command: SupervisorCommand) -> KernelResult<()> {
        self.commands
            .send(command)
            .map_err(|_| KernelError::SupervisorStopped)
    }
}
