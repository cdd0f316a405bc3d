use std::io::Write;
use std::sync::{Arc, Mutex};

use kernel_protocol::{Channel, ChannelSink, OutboundMessage};
use serde::Serialize;

#[derive(Serialize)]
struct OutboundLine<'a> {
    channel: Channel,
    #[serde(flatten)]
    message: &'a OutboundMessage,
}

/// Writes every message as one JSON line tagged with its channel. Clones
/// share the writer, so shell and iopub lines never interleave mid-line.
pub struct JsonLinesSink<W> {
    channel: Channel,
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for JsonLinesSink<W> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(channel: Channel, writer: W) -> Self {
        Self {
            channel,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Same writer, different channel tag.
    pub fn for_channel(&self, channel: Channel) -> Self {
        Self {
            channel,
            writer: Arc::clone(&self.writer),
        }
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl<W: Write + Send> ChannelSink for JsonLinesSink<W> {
    fn emit(&self, message: OutboundMessage) {
        let line = match serde_json::to_string(&OutboundLine {
            channel: self.channel,
            message: &message,
        }) {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(
                    channel = ?self.channel,
                    msg_type = message.content.msg_type(),
                    error = %error,
                    "failed to encode outbound message"
                );
                return;
            }
        };
        if let Err(error) = self.write_line(line.as_str()) {
            tracing::warn!(
                channel = ?self.channel,
                msg_type = message.content.msg_type(),
                error = %error,
                "failed to write outbound message"
            );
        }
    }
}
