use kernel_protocol::{KernelError, KernelResult, SessionIdentity};
use kernel_supervisor::SupervisorHandle;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Interrupt,
    Restart,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundLine {
    Control {
        control: ControlCommand,
    },
    Session {
        msg_type: String,
        #[serde(default)]
        header: Value,
        #[serde(default)]
        session: Value,
        #[serde(default)]
        content: Value,
    },
}

impl InboundLine {
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    Eof,
    Shutdown,
    SupervisorStopped,
}

/// Feed client lines into the supervisor until input ends, a shutdown is
/// requested, or the supervisor goes away. End of input shuts it down.
pub async fn run_stdin_bridge<R>(
    reader: R,
    handle: &SupervisorHandle,
) -> KernelResult<BridgeExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            () = handle.stopped() => {
                tracing::warn!("kernel supervisor stopped; no longer reading client input");
                return Ok(BridgeExit::SupervisorStopped);
            }
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("client input closed; shutting down kernel supervisor");
                return match handle.shutdown() {
                    Ok(()) | Err(KernelError::SupervisorStopped) => Ok(BridgeExit::Eof),
                    Err(error) => Err(error),
                };
            }
            Err(error) => {
                return Err(KernelError::Protocol(format!(
                    "failed to read client input: {error}"
                )))
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let inbound = match InboundLine::decode(line) {
            Ok(inbound) => inbound,
            Err(error) => {
                tracing::warn!(error = %error, "skipping undecodable client line");
                continue;
            }
        };
        let sent = match inbound {
            InboundLine::Control { control } => {
                tracing::debug!(control = ?control, "client control command");
                match control {
                    ControlCommand::Interrupt => handle.interrupt(),
                    ControlCommand::Restart => handle.restart(),
                    ControlCommand::Shutdown => {
                        return match handle.shutdown() {
                            Ok(()) => Ok(BridgeExit::Shutdown),
                            Err(KernelError::SupervisorStopped) => {
                                Ok(BridgeExit::SupervisorStopped)
                            }
                            Err(error) => Err(error),
                        };
                    }
                }
            }
            InboundLine::Session {
                msg_type,
                header,
                session,
                content,
            } => handle.submit_wire(
                SessionIdentity::new(header, session),
                msg_type.as_str(),
                &content,
            ),
        };
        match sent {
            Ok(()) => {}
            Err(KernelError::SupervisorStopped) => return Ok(BridgeExit::SupervisorStopped),
            Err(error) => return Err(error),
        }
    }
}
