use std::sync::Arc;
use std::time::Duration;

use kernel_protocol::{Channel, ChannelSink, KernelError, KernelResult, OutboundMessage};
use tokio::sync::watch;

/// Both outbound sinks, once bound.
#[derive(Clone)]
pub struct KernelChannels {
    pub shell: Arc<dyn ChannelSink>,
    pub iopub: Arc<dyn ChannelSink>,
}

impl KernelChannels {
    pub fn new(shell: Arc<dyn ChannelSink>, iopub: Arc<dyn ChannelSink>) -> Self {
        Self { shell, iopub }
    }

    /// Emit on whichever sink the message type belongs to.
    pub fn emit(&self, message: OutboundMessage) {
        match message.channel() {
            Channel::Shell => self.shell.emit(message),
            Channel::Iopub => self.iopub.emit(message),
        }
    }
}

impl std::fmt::Debug for KernelChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelChannels").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct BindingSlots {
    shell: Option<Arc<dyn ChannelSink>>,
    iopub: Option<Arc<dyn ChannelSink>>,
}

impl BindingSlots {
    fn channels(&self) -> Option<KernelChannels> {
        match (&self.shell, &self.iopub) {
            (Some(shell), Some(iopub)) => Some(KernelChannels::new(
                Arc::clone(shell),
                Arc::clone(iopub),
            )),
            _ => None,
        }
    }
}

/// Handshake point between the transport, which binds sinks whenever its
/// sockets come up, and the supervisor, which refuses to serve until both
/// are present.
#[derive(Clone)]
pub struct ChannelBinder {
    slots: Arc<watch::Sender<BindingSlots>>,
}

impl Default for ChannelBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBinder {
    pub fn new() -> Self {
        let (slots, _receiver) = watch::channel(BindingSlots::default());
        Self {
            slots: Arc::new(slots),
        }
    }

    /// Binding the same channel twice replaces the earlier sink.
    pub fn bind(&self, channel: Channel, sink: Arc<dyn ChannelSink>) {
        self.slots.send_modify(|slots| match channel {
            Channel::Shell => slots.shell = Some(sink),
            Channel::Iopub => slots.iopub = Some(sink),
        });
        tracing::debug!(channel = ?channel, "outbound channel bound");
    }

    pub fn is_bound(&self) -> bool {
        self.slots.borrow().channels().is_some()
    }

    pub async fn wait_bound(&self, bound: Duration) -> KernelResult<KernelChannels> {
        let mut receiver = self.slots.subscribe();
        let wait = async move {
            loop {
                let channels = receiver.borrow_and_update().channels();
                if let Some(channels) = channels {
                    return Ok(channels);
                }
                if receiver.changed().await.is_err() {
                    return Err(KernelError::Internal(
                        "channel binder dropped while waiting for sinks".to_owned(),
                    ));
                }
            }
        };

        match tokio::time::timeout(bound, wait).await {
            Ok(result) => result,
            Err(_) => Err(KernelError::ChannelBindTimeout(bound)),
        }
    }
}
