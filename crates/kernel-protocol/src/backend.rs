use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::KernelResult;
use crate::ids::WorkerId;
use crate::message::OutboundMessage;
use crate::request::WorkerCommand;
use crate::session::{Placement, WorkerExit, WorkerSpawnSpec};

/// A running worker. Commands are delivered asynchronously; responses come
/// back through the mailbox carried by each request's route address.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn id(&self) -> &WorkerId;
    async fn deliver(&self, command: WorkerCommand) -> KernelResult<()>;
    async fn terminate(&self) -> KernelResult<()>;
}

pub struct LaunchedWorker {
    pub handle: Arc<dyn WorkerHandle>,
    /// Fires once when the worker goes away for any reason.
    pub exit: oneshot::Receiver<WorkerExit>,
}

/// Process/host provisioning facility the lifecycle manager depends on.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn acquire_placement(&self) -> KernelResult<Placement>;
    async fn launch(
        &self,
        placement: &Placement,
        spec: WorkerSpawnSpec,
    ) -> KernelResult<LaunchedWorker>;
    async fn release_placement(&self, placement: &Placement) -> KernelResult<()>;
}

/// Outbound protocol channel. Delivery is fire-and-forget.
pub trait ChannelSink: Send + Sync {
    fn emit(&self, message: OutboundMessage);
}
