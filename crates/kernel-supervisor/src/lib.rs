//! Session supervisor for a remote kernel worker: one actor task that owns
//! the worker and the interrupt target, plus a short-lived response route
//! per outstanding request.

mod handle;
mod route;
mod state;
mod supervisor;

pub use handle::SupervisorHandle;
pub use route::{ResponseRoute, RouteKind, RouteOutcome};
pub use kernel_protocol::OrphanPolicy;
pub use state::SupervisorState;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorSnapshot};
