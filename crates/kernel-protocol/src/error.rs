use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("kernel configuration error: {0}")]
    Configuration(String),
    #[error("worker placement not obtained within {0:?}")]
    PlacementTimeout(Duration),
    #[error("shell and iopub channels not bound within {0:?}")]
    ChannelBindTimeout(Duration),
    #[error("worker placement error: {0}")]
    Placement(String),
    #[error("worker launch error: {0}")]
    Launch(String),
    #[error("worker delivery error: {0}")]
    Delivery(String),
    #[error("worker is not running: {0}")]
    WorkerGone(String),
    #[error("unrecognized session request: {0}")]
    UnrecognizedRequest(String),
    #[error("kernel supervisor has stopped")]
    SupervisorStopped,
    #[error("kernel protocol error: {0}")]
    Protocol(String),
    #[error("kernel internal error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Startup failures abort supervisor construction outright.
    pub fn is_startup_timeout(&self) -> bool {
        matches!(self, Self::PlacementTimeout(_) | Self::ChannelBindTimeout(_))
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
