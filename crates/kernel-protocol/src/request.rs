use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{KernelError, KernelResult};
use crate::ids::RouteId;

pub const EXECUTE_REQUEST: &str = "execute_request";
pub const COMPLETE_REQUEST: &str = "complete_request";
pub const OBJECT_INFO_REQUEST: &str = "object_info_request";

/// Work a client asks the kernel to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "execute")]
    Execute { counter: u64, code: String },
    #[serde(rename = "completion")]
    Completion {
        text: String,
        line: String,
        cursor_pos: usize,
    },
    #[serde(rename = "object_info")]
    ObjectInfo {
        oname: String,
        #[serde(default)]
        detail_level: u8,
    },
}

#[derive(Deserialize)]
struct ExecuteContent {
    counter: u64,
    code: String,
}

#[derive(Deserialize)]
struct CompleteContent {
    #[serde(default)]
    text: String,
    #[serde(default)]
    line: String,
    cursor_pos: usize,
}

#[derive(Deserialize)]
struct ObjectInfoContent {
    oname: String,
    #[serde(default)]
    detail_level: u8,
}

impl Request {
    pub fn execute(counter: u64, code: impl Into<String>) -> Self {
        Self::Execute {
            counter,
            code: code.into(),
        }
    }

    /// Decode a client message by its wire `msg_type`.
    pub fn from_wire(msg_type: &str, content: &Value) -> KernelResult<Self> {
        match msg_type {
            EXECUTE_REQUEST => {
                let ExecuteContent { counter, code } = decode_content(msg_type, content)?;
                Ok(Self::Execute { counter, code })
            }
            COMPLETE_REQUEST => {
                let CompleteContent {
                    text,
                    line,
                    cursor_pos,
                } = decode_content(msg_type, content)?;
                Ok(Self::Completion {
                    text,
                    line,
                    cursor_pos,
                })
            }
            OBJECT_INFO_REQUEST => {
                let ObjectInfoContent {
                    oname,
                    detail_level,
                } = decode_content(msg_type, content)?;
                Ok(Self::ObjectInfo {
                    oname,
                    detail_level,
                })
            }
            other => Err(KernelError::UnrecognizedRequest(format!(
                "unknown msg_type '{other}'"
            ))),
        }
    }
}

fn decode_content<T>(msg_type: &str, content: &Value) -> KernelResult<T>
where
    T: serde::de::DeserializeOwned,
{
    T::deserialize(content).map_err(|error| {
        KernelError::UnrecognizedRequest(format!("malformed {msg_type} content: {error}"))
    })
}

/// What the worker sends back for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "stream")]
    Stream { data: String, name: String },
    #[serde(rename = "execute_result")]
    ExecuteResult { html: String },
    #[serde(rename = "error")]
    Error { message: String, incomplete: bool },
    #[serde(rename = "completion_result")]
    CompletionResult {
        cursor: usize,
        candidates: Vec<String>,
        matched_text: String,
    },
    #[serde(rename = "object_info_result")]
    ObjectInfoResult {
        found: bool,
        name: String,
        call_def: String,
        call_docstring: String,
    },
}

impl Response {
    pub fn stream(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Stream {
            data: data.into(),
            name: name.into(),
        }
    }

    pub fn execute_result(html: impl Into<String>) -> Self {
        Self::ExecuteResult { html: html.into() }
    }

    pub fn error(message: impl Into<String>, incomplete: bool) -> Self {
        Self::Error {
            message: message.into(),
            incomplete,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }
}

pub type RouteMailbox = mpsc::UnboundedSender<Response>;

/// Reply address attached to a forwarded request. Only `id` leaves the
/// process; the mailbox stays with whichever side routes responses.
#[derive(Debug, Clone)]
pub struct RouteAddress {
    pub id: RouteId,
    pub mailbox: RouteMailbox,
}

#[derive(Debug, Clone)]
pub enum WorkerCommand {
    Request {
        route: RouteAddress,
        request: Request,
    },
    Interrupt {
        origin: RouteId,
    },
}
