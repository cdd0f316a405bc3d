use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-supplied header and session metadata. Carried unmodified onto
/// every outbound message produced for the request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionIdentity {
    #[serde(default)]
    pub header: Value,
    #[serde(default)]
    pub session: Value,
}

impl SessionIdentity {
    pub fn new(header: Value, session: Value) -> Self {
        Self { header, session }
    }
}

/// Immutable worker configuration handed to every launch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerSpawnSpec {
    pub init_scripts: Vec<String>,
    pub compiler_args: Vec<String>,
}

/// What a route does once its mailbox closes without a terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Log and terminate silently; the client never hears back.
    #[default]
    Abandon,
    /// Run the execution error path with a synthesized worker-terminated error.
    #[serde(alias = "report-error")]
    ReportError,
}

/// Where a worker runs. Acquired before launch, released on teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: String,
    pub location: Option<PathBuf>,
}

impl Placement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: None,
        }
    }

    pub fn at(id: impl Into<String>, location: PathBuf) -> Self {
        Self {
            id: id.into(),
            location: Some(location),
        }
    }
}

/// Why a worker process went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerExit {
    Exited(i32),
    Signaled(i32),
    Unknown(String),
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::Unknown(reason) => write!(f, "terminated: {reason}"),
        }
    }
}
