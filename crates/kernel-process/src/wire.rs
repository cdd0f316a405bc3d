use kernel_protocol::{Request, Response, RouteId};
use serde::{Deserialize, Serialize};

/// Lines written to the worker's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerInput {
    Init {
        init_scripts: Vec<String>,
        compiler_args: Vec<String>,
    },
    Request {
        route: RouteId,
        request: Request,
    },
    Interrupt {
        route: RouteId,
    },
}

/// Lines read from the worker's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerOutput {
    Ready,
    Response { route: RouteId, response: Response },
}

impl WorkerInput {
    pub(crate) fn encode(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl WorkerOutput {
    pub(crate) fn decode(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
