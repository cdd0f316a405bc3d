//! Stdio front end for the kernel supervisor: client lines in on one
//! stream, shell and iopub traffic out as JSON lines on another.

use std::io::Write;
use std::sync::Arc;

use kernel_channels::ChannelBinder;
use kernel_protocol::{Channel, KernelResult, WorkerLauncher};
use kernel_supervisor::{Supervisor, SupervisorConfig};
use tokio::io::AsyncBufRead;

mod bridge;
mod composition;
mod sink;

pub use bridge::{run_stdin_bridge, BridgeExit, ControlCommand, InboundLine};
pub use composition::{launcher_config, supervisor_config};
pub use sink::JsonLinesSink;

/// Bind both channels to `output`, start the supervisor, and pump `input`
/// into it until the session ends. Returns once the supervisor has stopped.
pub async fn serve<R, W>(
    launcher: Arc<dyn WorkerLauncher>,
    config: SupervisorConfig,
    input: R,
    output: W,
) -> KernelResult<BridgeExit>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send + 'static,
{
    let binder = ChannelBinder::new();
    let shell = JsonLinesSink::new(Channel::Shell, output);
    let iopub = shell.for_channel(Channel::Iopub);
    binder.bind(Channel::Shell, Arc::new(shell));
    binder.bind(Channel::Iopub, Arc::new(iopub));

    let handle = Supervisor::start(launcher, &binder, config).await?;
    tracing::info!("kernel supervisor ready");

    let exit = run_stdin_bridge(input, &handle).await;
    if !matches!(exit, Ok(BridgeExit::Eof | BridgeExit::Shutdown)) {
        let _ = handle.shutdown();
    }
    let joined = handle.join().await;
    let exit = exit?;
    joined?;
    tracing::info!(exit = ?exit, "kernel supervisor stopped");
    Ok(exit)
}
