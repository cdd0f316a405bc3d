use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::SessionIdentity;

pub const TEXT_HTML: &str = "text/html";
const ERROR_STATUS: &str = "error";
const ERROR_NAME: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Shell,
    Iopub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg_type", content = "content", rename_all = "snake_case")]
pub enum MessageContent {
    Status {
        execution_state: ExecutionState,
    },
    Pyin {
        execution_count: u64,
        code: String,
    },
    Stream {
        data: String,
        name: String,
    },
    Pyout {
        execution_count: u64,
        data: BTreeMap<String, String>,
    },
    #[serde(rename = "pyincomplete")]
    PyIncomplete {
        execution_count: u64,
        status: String,
    },
    Pyerr {
        execution_count: u64,
        status: String,
        ename: String,
        traceback: Vec<String>,
    },
    ExecuteReply {
        execution_count: u64,
    },
    CompleteReply {
        matched_text: String,
        matches: Vec<String>,
    },
    ObjectInfoReply {
        found: bool,
        name: String,
        call_def: String,
        call_docstring: String,
    },
}

impl MessageContent {
    pub fn status(execution_state: ExecutionState) -> Self {
        Self::Status { execution_state }
    }

    pub fn pyout_html(execution_count: u64, html: impl Into<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert(TEXT_HTML.to_owned(), html.into());
        Self::Pyout {
            execution_count,
            data,
        }
    }

    pub fn pyincomplete(execution_count: u64) -> Self {
        Self::PyIncomplete {
            execution_count,
            status: ERROR_STATUS.to_owned(),
        }
    }

    pub fn pyerr(execution_count: u64, message: impl Into<String>) -> Self {
        Self::Pyerr {
            execution_count,
            status: ERROR_STATUS.to_owned(),
            ename: ERROR_NAME.to_owned(),
            traceback: vec![message.into()],
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Status { .. }
            | Self::Pyin { .. }
            | Self::Stream { .. }
            | Self::Pyout { .. }
            | Self::PyIncomplete { .. }
            | Self::Pyerr { .. } => Channel::Iopub,
            Self::ExecuteReply { .. }
            | Self::CompleteReply { .. }
            | Self::ObjectInfoReply { .. } => Channel::Shell,
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Pyin { .. } => "pyin",
            Self::Stream { .. } => "stream",
            Self::Pyout { .. } => "pyout",
            Self::PyIncomplete { .. } => "pyincomplete",
            Self::Pyerr { .. } => "pyerr",
            Self::ExecuteReply { .. } => "execute_reply",
            Self::CompleteReply { .. } => "complete_reply",
            Self::ObjectInfoReply { .. } => "object_info_reply",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub identity: SessionIdentity,
    #[serde(flatten)]
    pub content: MessageContent,
}

impl OutboundMessage {
    pub fn new(identity: SessionIdentity, content: MessageContent) -> Self {
        Self { identity, content }
    }

    pub fn channel(&self) -> Channel {
        self.content.channel()
    }
}
