//! Outbound channel plumbing: the shell/iopub binding handshake the
//! supervisor waits on during startup, and the fan-out it emits through.

pub mod binding;

pub use binding::{ChannelBinder, KernelChannels};
