use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kernel_protocol::{
    KernelError, KernelResult, RouteId, RouteMailbox, WorkerCommand, WorkerExit, WorkerHandle,
    WorkerId,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::wire::{WorkerInput, WorkerOutput};

/// How long a worker may linger after closing stdout before it is killed.
const STDOUT_CLOSE_GRACE: Duration = Duration::from_secs(1);

pub(crate) type PendingRoutes = Arc<AsyncMutex<HashMap<RouteId, RouteMailbox>>>;

pub(crate) struct ProcessWorker {
    id: WorkerId,
    stdin: Arc<AsyncMutex<ChildStdin>>,
    pending: PendingRoutes,
    alive: Arc<AtomicBool>,
    kill: AsyncMutex<Option<oneshot::Sender<()>>>,
    reaper: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ProcessWorker {
    /// Take ownership of a child that has already reported ready and start
    /// its reader and reaper tasks.
    pub(crate) fn start(
        id: WorkerId,
        child: Child,
        stdin: ChildStdin,
        stdout: Lines<BufReader<ChildStdout>>,
        stderr: Option<ChildStderr>,
        exit: oneshot::Sender<WorkerExit>,
    ) -> Self {
        let pending: PendingRoutes = Arc::new(AsyncMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        tokio::spawn(run_reader_loop(
            id.clone(),
            stdout,
            Arc::clone(&pending),
            closed_tx,
        ));
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(id.clone(), stderr));
        }
        let reaper = tokio::spawn(reap(
            id.clone(),
            child,
            kill_rx,
            closed_rx,
            Arc::clone(&alive),
            exit,
        ));

        Self {
            id,
            stdin: Arc::new(AsyncMutex::new(stdin)),
            pending,
            alive,
            kill: AsyncMutex::new(Some(kill_tx)),
            reaper: AsyncMutex::new(Some(reaper)),
        }
    }

    async fn send(&self, input: &WorkerInput) -> KernelResult<()> {
        let encoded = input.encode().map_err(|error| {
            KernelError::Protocol(format!("failed to encode kernel worker command: {error}"))
        })?;
        write_line(&self.stdin, encoded.as_str()).await
    }
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn deliver(&self, command: WorkerCommand) -> KernelResult<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(KernelError::WorkerGone(self.id.to_string()));
        }
        match command {
            WorkerCommand::Request { route, request } => {
                let route_id = route.id;
                self.pending.lock().await.insert(route_id, route.mailbox);
                let input = WorkerInput::Request {
                    route: route_id,
                    request,
                };
                if let Err(error) = self.send(&input).await {
                    self.pending.lock().await.remove(&route_id);
                    return Err(error);
                }
                Ok(())
            }
            WorkerCommand::Interrupt { origin } => {
                self.send(&WorkerInput::Interrupt { route: origin }).await
            }
        }
    }

    async fn terminate(&self) -> KernelResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(kill) = self.kill.lock().await.take() {
            let _ = kill.send(());
        }
        let reaper = self.reaper.lock().await.take();
        if let Some(reaper) = reaper {
            reaper.await.map_err(|error| {
                KernelError::Internal(format!("kernel worker reaper failed: {error}"))
            })?;
        }
        Ok(())
    }
}

pub(crate) async fn write_line(stdin: &AsyncMutex<ChildStdin>, line: &str) -> KernelResult<()> {
    let mut stdin = stdin.lock().await;
    stdin.write_all(line.as_bytes()).await.map_err(|error| {
        KernelError::Delivery(format!("failed to write to kernel worker: {error}"))
    })?;
    stdin.flush().await.map_err(|error| {
        KernelError::Delivery(format!("failed to flush kernel worker stdin: {error}"))
    })
}

async fn run_reader_loop(
    worker_id: WorkerId,
    mut stdout: Lines<BufReader<ChildStdout>>,
    pending: PendingRoutes,
    closed: oneshot::Sender<()>,
) {
    let reason = loop {
        let line = match stdout.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "kernel worker closed stdout".to_owned(),
            Err(error) => break format!("failed to read kernel worker output: {error}"),
        };
        if line.trim().is_empty() {
            continue;
        }

        let (route_id, response) = match WorkerOutput::decode(line.as_str()) {
            Ok(WorkerOutput::Response { route, response }) => (route, response),
            Ok(WorkerOutput::Ready) => {
                tracing::debug!(worker_id = %worker_id, "ignoring repeated ready line");
                continue;
            }
            Err(error) => {
                tracing::warn!(
                    worker_id = %worker_id,
                    error = %error,
                    "skipping malformed kernel worker line"
                );
                continue;
            }
        };

        let terminal = response.is_terminal();
        let mut routes = pending.lock().await;
        let Some(mailbox) = routes.get(&route_id) else {
            tracing::warn!(
                worker_id = %worker_id,
                route_id = %route_id,
                "response for unknown route"
            );
            continue;
        };
        let _ = mailbox.send(response);
        if terminal {
            routes.remove(&route_id);
        }
    };

    let orphaned = {
        let mut pending = pending.lock().await;
        let orphaned = pending.len();
        pending.clear();
        orphaned
    };
    tracing::debug!(
        worker_id = %worker_id,
        orphaned,
        reason = reason.as_str(),
        "kernel worker reader stopped"
    );
    let _ = closed.send(());
}

async fn forward_stderr(worker_id: WorkerId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(worker_id = %worker_id, line = line.as_str(), "kernel worker stderr");
    }
}

/// Owns the child until it exits, killing it on request or once its
/// stdout is gone, and reports how it went away.
async fn reap(
    worker_id: WorkerId,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    stdout_closed: oneshot::Receiver<()>,
    alive: Arc<AtomicBool>,
    exit: oneshot::Sender<WorkerExit>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            let _ = child.kill().await;
            child.wait().await
        }
        _ = stdout_closed => {
            match tokio::time::timeout(STDOUT_CLOSE_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            }
        }
    };
    alive.store(false, Ordering::SeqCst);

    let exit_reason = match status {
        Ok(status) => exit_from_status(status),
        Err(error) => WorkerExit::Unknown(format!("failed to wait for kernel worker: {error}")),
    };
    tracing::info!(worker_id = %worker_id, exit = %exit_reason, "kernel worker exited");
    let _ = exit.send(exit_reason);
}

pub(crate) fn exit_from_status(status: ExitStatus) -> WorkerExit {
    if let Some(code) = status.code() {
        return WorkerExit::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return WorkerExit::Signaled(signal);
        }
    }
    WorkerExit::Unknown(status.to_string())
}
