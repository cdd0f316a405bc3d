//! Runs the kernel worker as a local child process. Each spawn gets its own
//! scratch directory as its placement and talks newline-delimited JSON over
//! the child's stdin and stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kernel_protocol::defaults::{
    DEFAULT_PLACEMENT_DIR, DEFAULT_WORKER_BINARY, DEFAULT_WORKER_READY_TIMEOUT,
};
use kernel_protocol::{
    KernelError, KernelResult, LaunchedWorker, Placement, WorkerId, WorkerLauncher,
    WorkerSpawnSpec,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;

mod wire;
mod worker;

use wire::{WorkerInput, WorkerOutput};
use worker::ProcessWorker;

const ENV_WORKER_BIN: &str = "KERNEL_SUPERVISOR_WORKER_BIN";

#[derive(Debug, Clone)]
pub struct ProcessLauncherConfig {
    pub binary: PathBuf,
    pub base_args: Vec<String>,
    pub placement_root: PathBuf,
    pub ready_timeout: Duration,
}

impl Default for ProcessLauncherConfig {
    fn default() -> Self {
        Self {
            binary: std::env::var_os(ENV_WORKER_BIN)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKER_BINARY)),
            base_args: Vec::new(),
            placement_root: std::env::temp_dir().join(DEFAULT_PLACEMENT_DIR),
            ready_timeout: DEFAULT_WORKER_READY_TIMEOUT,
        }
    }
}

pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
    next_placement: AtomicU64,
}

impl ProcessLauncher {
    pub fn new(config: ProcessLauncherConfig) -> Self {
        Self {
            config,
            next_placement: AtomicU64::new(1),
        }
    }

    pub fn from_env() -> Self {
        Self::new(ProcessLauncherConfig::default())
    }

    pub fn config(&self) -> &ProcessLauncherConfig {
        &self.config
    }

    async fn await_ready(
        &self,
        worker_id: &WorkerId,
        stdout: &mut Lines<BufReader<ChildStdout>>,
    ) -> KernelResult<()> {
        let wait = async {
            loop {
                let line = match stdout.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        return Err(KernelError::Launch(
                            "kernel worker exited before reporting ready".to_owned(),
                        ))
                    }
                    Err(error) => {
                        return Err(KernelError::Launch(format!(
                            "failed to read kernel worker output: {error}"
                        )))
                    }
                };
                match WorkerOutput::decode(line.trim()) {
                    Ok(WorkerOutput::Ready) => return Ok(()),
                    Ok(other) => {
                        tracing::warn!(
                            worker_id = %worker_id,
                            line = ?other,
                            "kernel worker spoke before ready"
                        );
                    }
                    Err(_) if line.trim().is_empty() => {}
                    Err(error) => {
                        tracing::warn!(
                            worker_id = %worker_id,
                            error = %error,
                            "skipping malformed kernel worker line"
                        );
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.ready_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(KernelError::Launch(format!(
                "kernel worker not ready within {:?}",
                self.config.ready_timeout
            ))),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn acquire_placement(&self) -> KernelResult<Placement> {
        let n = self.next_placement.fetch_add(1, Ordering::SeqCst);
        let id = format!("kernel-{}-{n}", std::process::id());
        let location = self.config.placement_root.join(&id);
        std::fs::create_dir_all(&location).map_err(|error| {
            KernelError::Placement(format!(
                "failed to create worker directory '{}': {error}",
                location.display()
            ))
        })?;
        tracing::debug!(
            placement = id.as_str(),
            location = %location.display(),
            "worker placement acquired"
        );
        Ok(Placement::at(id, location))
    }

    async fn launch(
        &self,
        placement: &Placement,
        spec: WorkerSpawnSpec,
    ) -> KernelResult<LaunchedWorker> {
        let mut command = Command::new(&self.config.binary);
        command.args(&self.config.base_args);
        if let Some(location) = placement.location.as_deref() {
            command.current_dir(location);
        }
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|error| {
            KernelError::Launch(format!(
                "failed to launch kernel worker '{}': {error}",
                self.config.binary.display()
            ))
        })?;
        let worker_id = WorkerId::new(format!(
            "{}:{}",
            placement.id,
            child.id().unwrap_or_default()
        ));

        let mut stdin = take_pipe(&mut child, |child| child.stdin.take(), "stdin").await?;
        let stdout = take_pipe(&mut child, |child| child.stdout.take(), "stdout").await?;
        let stderr = child.stderr.take();

        let init = WorkerInput::Init {
            init_scripts: spec.init_scripts,
            compiler_args: spec.compiler_args,
        };
        let handshake = async {
            let line = init.encode().map_err(|error| {
                KernelError::Protocol(format!("failed to encode kernel worker init: {error}"))
            })?;
            stdin.write_all(line.as_bytes()).await.map_err(|error| {
                KernelError::Launch(format!("failed to send kernel worker init: {error}"))
            })?;
            stdin.flush().await.map_err(|error| {
                KernelError::Launch(format!("failed to flush kernel worker init: {error}"))
            })?;
            let mut lines = BufReader::new(stdout).lines();
            self.await_ready(&worker_id, &mut lines).await?;
            Ok::<_, KernelError>(lines)
        };
        let lines = match handshake.await {
            Ok(lines) => lines,
            Err(error) => {
                let _ = child.kill().await;
                return Err(error);
            }
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        let worker =
            ProcessWorker::start(worker_id.clone(), child, stdin, lines, stderr, exit_tx);
        tracing::info!(
            worker_id = %worker_id,
            binary = %self.config.binary.display(),
            "kernel worker process ready"
        );
        Ok(LaunchedWorker {
            handle: Arc::new(worker),
            exit: exit_rx,
        })
    }

    async fn release_placement(&self, placement: &Placement) -> KernelResult<()> {
        let Some(location) = placement.location.as_deref() else {
            return Ok(());
        };
        remove_placement_dir(location)?;
        tracing::debug!(placement = placement.id.as_str(), "worker placement released");
        Ok(())
    }
}

async fn take_pipe<T>(
    child: &mut Child,
    take: impl FnOnce(&mut Child) -> Option<T>,
    name: &str,
) -> KernelResult<T> {
    match take(child) {
        Some(pipe) => Ok(pipe),
        None => {
            let _ = child.kill().await;
            Err(KernelError::Launch(format!("kernel worker {name} unavailable")))
        }
    }
}

fn remove_placement_dir(location: &Path) -> KernelResult<()> {
    match std::fs::remove_dir_all(location) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(KernelError::Placement(format!(
            "failed to remove worker directory '{}': {error}",
            location.display()
        ))),
    }
}
