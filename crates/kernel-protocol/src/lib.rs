//! Shared kernel supervisor protocol: request/response variants exchanged
//! with the worker, outbound client messages, and the collaborator traits
//! the supervisor is built against.

pub mod backend;
pub mod defaults;
pub mod error;
pub mod ids;
pub mod message;
pub mod request;
pub mod session;

pub use backend::{ChannelSink, LaunchedWorker, WorkerHandle, WorkerLauncher};
pub use error::{KernelError, KernelResult};
pub use ids::{RouteId, WorkerId};
pub use message::{Channel, ExecutionState, MessageContent, OutboundMessage};
pub use request::{Request, Response, RouteAddress, RouteMailbox, WorkerCommand};
pub use session::{OrphanPolicy, Placement, SessionIdentity, WorkerExit, WorkerSpawnSpec};
