use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kernel_channels::ChannelBinder;
use kernel_lifecycle::WorkerLifecycleConfig;
use kernel_protocol::{
    Channel, ChannelSink, ExecutionState, KernelError, KernelResult, LaunchedWorker,
    MessageContent, OutboundMessage, Placement, Request, Response, RouteAddress, RouteId,
    SessionIdentity, WorkerCommand, WorkerExit, WorkerHandle, WorkerId, WorkerLauncher,
    WorkerSpawnSpec,
};
use kernel_supervisor::{
    OrphanPolicy, Supervisor, SupervisorConfig, SupervisorHandle, SupervisorState,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(100);
const HOLD: &str = "hold";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivered {
    Request { route: RouteId, request: Request },
    Interrupt { origin: RouteId },
}

/// In-memory worker. Executions answer `code` back as html, except `hold`,
/// which keeps the route open until interrupted or the worker dies.
struct ScriptedWorker {
    id: WorkerId,
    delivered: Mutex<Vec<Delivered>>,
    held: Mutex<Vec<RouteAddress>>,
    terminated: AtomicBool,
}

impl ScriptedWorker {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            delivered: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        }
    }

    fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().expect("lock delivered").clone()
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Answers a held execution with `value` as its result.
    fn release(&self, route_id: RouteId, value: &str) {
        let mut held = self.held.lock().expect("lock held");
        let index = held
            .iter()
            .position(|route| route.id == route_id)
            .expect("route is held");
        let route = held.remove(index);
        let _ = route.mailbox.send(Response::execute_result(value));
    }

    fn die(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.held.lock().expect("lock held").clear();
    }

    fn answer(request: &Request) -> Option<Vec<Response>> {
        let responses = match request {
            Request::Execute { code, .. } if code == HOLD => return None,
            Request::Execute { code, .. } if code.ends_with('(') => {
                vec![Response::error("unexpected EOF", true)]
            }
            Request::Execute { code, .. } if code == "boom" => {
                vec![Response::error("not found: value boom", false)]
            }
            Request::Execute { code, .. } if code == "1+1" => vec![Response::execute_result("2")],
            Request::Execute { code, .. } => vec![
                Response::stream("stdout", format!("{code}-1")),
                Response::stream("stdout", format!("{code}-2")),
                Response::execute_result(code.clone()),
            ],
            Request::Completion { .. } => vec![Response::CompletionResult {
                cursor: 2,
                candidates: vec!["foo".to_owned(), "foobar".to_owned()],
                matched_text: "fo".to_owned(),
            }],
            Request::ObjectInfo { oname, .. } => vec![Response::ObjectInfoResult {
                found: true,
                name: oname.clone(),
                call_def: format!("{oname}(x: Any): Unit"),
                call_docstring: String::new(),
            }],
        };
        Some(responses)
    }
}

#[async_trait]
impl WorkerHandle for ScriptedWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn deliver(&self, command: WorkerCommand) -> KernelResult<()> {
        if self.is_terminated() {
            return Err(KernelError::WorkerGone(self.id.to_string()));
        }
        match command {
            WorkerCommand::Request { route, request } => {
                self.delivered
                    .lock()
                    .expect("lock delivered")
                    .push(Delivered::Request {
                        route: route.id,
                        request: request.clone(),
                    });
                match Self::answer(&request) {
                    Some(responses) => {
                        for response in responses {
                            let _ = route.mailbox.send(response);
                        }
                    }
                    None => self.held.lock().expect("lock held").push(route),
                }
            }
            WorkerCommand::Interrupt { origin } => {
                self.delivered
                    .lock()
                    .expect("lock delivered")
                    .push(Delivered::Interrupt { origin });
                let mut held = self.held.lock().expect("lock held");
                if let Some(index) = held.iter().position(|route| route.id == origin) {
                    let route = held.remove(index);
                    let _ = route.mailbox.send(Response::error("interrupted", false));
                }
            }
        }
        Ok(())
    }

    async fn terminate(&self) -> KernelResult<()> {
        self.die();
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedLauncher {
    placement_delay: Option<Duration>,
    /// Launches after this many successful ones fail.
    launch_budget: Option<u32>,
    launch_attempts: AtomicU32,
    workers: Mutex<Vec<Arc<ScriptedWorker>>>,
    exits: Mutex<Vec<Option<oneshot::Sender<WorkerExit>>>>,
    released: Mutex<Vec<String>>,
}

impl ScriptedLauncher {
    fn worker(&self, index: usize) -> Arc<ScriptedWorker> {
        self.workers.lock().expect("lock workers")[index].clone()
    }

    fn launched(&self) -> usize {
        self.workers.lock().expect("lock workers").len()
    }

    fn released(&self) -> Vec<String> {
        self.released.lock().expect("lock released").clone()
    }

    fn crash(&self, index: usize) {
        self.worker(index).die();
        let sender = self.exits.lock().expect("lock exits")[index]
            .take()
            .expect("worker not crashed yet");
        let _ = sender.send(WorkerExit::Signaled(9));
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn acquire_placement(&self) -> KernelResult<Placement> {
        if let Some(delay) = self.placement_delay {
            tokio::time::sleep(delay).await;
        }
        let attempt = self.launch_attempts.load(Ordering::SeqCst) + 1;
        Ok(Placement::new(format!("placement-{attempt}")))
    }

    async fn launch(
        &self,
        _placement: &Placement,
        _spec: WorkerSpawnSpec,
    ) -> KernelResult<LaunchedWorker> {
        let attempt = self.launch_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.launch_budget.is_some_and(|budget| attempt > budget) {
            return Err(KernelError::Launch(format!("launch {attempt} refused")));
        }
        let worker = Arc::new(ScriptedWorker::new(WorkerId::new(format!("worker-{attempt}"))));
        let (exit_tx, exit_rx) = oneshot::channel();
        self.workers.lock().expect("lock workers").push(worker.clone());
        self.exits.lock().expect("lock exits").push(Some(exit_tx));
        Ok(LaunchedWorker {
            handle: worker,
            exit: exit_rx,
        })
    }

    async fn release_placement(&self, placement: &Placement) -> KernelResult<()> {
        self.released
            .lock()
            .expect("lock released")
            .push(placement.id.clone());
        Ok(())
    }
}

struct RecordingSink {
    channel: Channel,
    outbound: mpsc::UnboundedSender<(Channel, OutboundMessage)>,
}

impl ChannelSink for RecordingSink {
    fn emit(&self, message: OutboundMessage) {
        let _ = self.outbound.send((self.channel, message));
    }
}

struct Harness {
    launcher: Arc<ScriptedLauncher>,
    handle: SupervisorHandle,
    outbound: mpsc::UnboundedReceiver<(Channel, OutboundMessage)>,
}

impl Harness {
    async fn start(launcher: ScriptedLauncher, config: SupervisorConfig) -> Self {
        let launcher = Arc::new(launcher);
        let (binder, outbound) = bound_binder();
        let handle = Supervisor::start(launcher.clone(), &binder, config)
            .await
            .expect("start supervisor");
        Self {
            launcher,
            handle,
            outbound,
        }
    }

    async fn next(&mut self) -> (Channel, MessageContent) {
        let (channel, message) = timeout(TEST_TIMEOUT, self.outbound.recv())
            .await
            .expect("outbound message timeout")
            .expect("outbound channel open");
        (channel, message.content)
    }

    async fn take(&mut self, count: usize) -> Vec<(Channel, MessageContent)> {
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(self.next().await);
        }
        messages
    }

    async fn assert_quiet(&mut self) {
        if let Ok(Some((channel, message))) = timeout(QUIET_PERIOD, self.outbound.recv()).await {
            panic!("unexpected {channel:?} message: {:?}", message.content);
        }
    }

    fn execute(&self, counter: u64, code: &str) {
        self.handle
            .session_request(identity(counter), Request::execute(counter, code))
            .expect("submit execute");
    }

    async fn wait_for_idle_slot(&self) {
        timeout(TEST_TIMEOUT, async {
            loop {
                let snapshot = self.handle.snapshot().await.expect("snapshot");
                if snapshot.current_route.is_none() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("current operation never cleared");
    }

    async fn wait_for_launches(&self, count: usize) {
        timeout(TEST_TIMEOUT, async {
            while self.launcher.launched() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("replacement worker never launched");
    }
}

fn bound_binder() -> (
    ChannelBinder,
    mpsc::UnboundedReceiver<(Channel, OutboundMessage)>,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let binder = ChannelBinder::new();
    for channel in [Channel::Shell, Channel::Iopub] {
        binder.bind(
            channel,
            Arc::new(RecordingSink {
                channel,
                outbound: outbound_tx.clone(),
            }),
        );
    }
    (binder, outbound_rx)
}

fn identity(n: u64) -> SessionIdentity {
    SessionIdentity::new(json!({"msg_id": format!("msg-{n}")}), json!({"session": "s-1"}))
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        lifecycle: WorkerLifecycleConfig {
            spawn_spec: WorkerSpawnSpec {
                init_scripts: vec!["init.sc".to_owned()],
                compiler_args: vec!["-feature".to_owned()],
            },
            placement_timeout: Duration::from_millis(500),
        },
        channel_bind_timeout: Duration::from_millis(500),
        respawn_attempts: 2,
        respawn_backoff: Duration::from_millis(10),
        orphan_policy: OrphanPolicy::Abandon,
    }
}

fn busy() -> (Channel, MessageContent) {
    (Channel::Iopub, MessageContent::status(ExecutionState::Busy))
}

fn idle() -> (Channel, MessageContent) {
    (Channel::Iopub, MessageContent::status(ExecutionState::Idle))
}

fn pyin(counter: u64, code: &str) -> (Channel, MessageContent) {
    (
        Channel::Iopub,
        MessageContent::Pyin {
            execution_count: counter,
            code: code.to_owned(),
        },
    )
}

fn reply(counter: u64) -> (Channel, MessageContent) {
    (
        Channel::Shell,
        MessageContent::ExecuteReply {
            execution_count: counter,
        },
    )
}

fn stream(data: &str) -> (Channel, MessageContent) {
    (
        Channel::Iopub,
        MessageContent::Stream {
            data: data.to_owned(),
            name: "stdout".to_owned(),
        },
    )
}

#[tokio::test]
async fn execute_emits_busy_echo_result_idle_then_reply() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(1, "1+1");

    assert_eq!(
        harness.take(5).await,
        vec![
            busy(),
            pyin(1, "1+1"),
            (Channel::Iopub, MessageContent::pyout_html(1, "2")),
            idle(),
            reply(1),
        ]
    );
    harness.assert_quiet().await;
    assert_eq!(
        harness.launcher.worker(0).delivered(),
        vec![Delivered::Request {
            route: RouteId::new(1),
            request: Request::execute(1, "1+1"),
        }]
    );
}

#[tokio::test]
async fn outbound_messages_carry_the_request_identity() {
    let (binder, mut outbound) = bound_binder();
    let handle = Supervisor::start(Arc::new(ScriptedLauncher::default()), &binder, config())
        .await
        .expect("start supervisor");

    handle
        .session_request(identity(7), Request::execute(7, "1+1"))
        .expect("submit execute");

    for _ in 0..5 {
        let (_, message) = timeout(TEST_TIMEOUT, outbound.recv())
            .await
            .expect("outbound message timeout")
            .expect("outbound channel open");
        assert_eq!(message.identity, identity(7));
    }
}

#[tokio::test]
async fn streams_are_forwarded_in_arrival_order_before_the_result() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(3, "println");

    assert_eq!(
        harness.take(7).await,
        vec![
            busy(),
            pyin(3, "println"),
            stream("println-1"),
            stream("println-2"),
            (Channel::Iopub, MessageContent::pyout_html(3, "println")),
            idle(),
            reply(3),
        ]
    );
}

#[tokio::test]
async fn incomplete_input_is_reported_as_pyincomplete() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(2, "foo(");

    assert_eq!(
        harness.take(5).await,
        vec![
            busy(),
            pyin(2, "foo("),
            (Channel::Iopub, MessageContent::pyincomplete(2)),
            idle(),
            reply(2),
        ]
    );
}

#[tokio::test]
async fn execution_error_is_reported_and_the_next_request_still_runs() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(1, "boom");
    assert_eq!(
        harness.take(5).await,
        vec![
            busy(),
            pyin(1, "boom"),
            (
                Channel::Iopub,
                MessageContent::pyerr(1, "not found: value boom")
            ),
            idle(),
            reply(1),
        ]
    );

    harness.execute(2, "1+1");
    assert_eq!(harness.take(5).await.last(), Some(&reply(2)));
}

#[tokio::test]
async fn completion_produces_a_single_shell_reply() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness
        .handle
        .submit_wire(
            identity(1),
            "complete_request",
            &json!({"text": "fo", "line": "fo", "cursor_pos": 2}),
        )
        .expect("submit completion");

    assert_eq!(
        harness.next().await,
        (
            Channel::Shell,
            MessageContent::CompleteReply {
                matched_text: "fo".to_owned(),
                matches: vec!["foo".to_owned(), "foobar".to_owned()],
            }
        )
    );
    harness.assert_quiet().await;
}

#[tokio::test]
async fn object_info_produces_a_single_shell_reply() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness
        .handle
        .session_request(
            identity(1),
            Request::ObjectInfo {
                oname: "println".to_owned(),
                detail_level: 0,
            },
        )
        .expect("submit object info");

    assert_eq!(
        harness.next().await,
        (
            Channel::Shell,
            MessageContent::ObjectInfoReply {
                found: true,
                name: "println".to_owned(),
                call_def: "println(x: Any): Unit".to_owned(),
                call_docstring: String::new(),
            }
        )
    );
    harness.assert_quiet().await;
}

#[tokio::test]
async fn unrecognized_wire_requests_are_dropped() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness
        .handle
        .submit_wire(identity(1), "history_request", &json!({}))
        .expect("unknown requests are not an error");
    harness
        .handle
        .submit_wire(identity(1), "execute_request", &json!({"code": 12}))
        .expect("malformed requests are not an error");
    harness.assert_quiet().await;
    assert!(harness.launcher.worker(0).delivered().is_empty());

    harness
        .handle
        .submit_wire(
            identity(1),
            "execute_request",
            &json!({"counter": 1, "code": "1+1"}),
        )
        .expect("submit execute");
    assert_eq!(harness.take(5).await.last(), Some(&reply(1)));
    assert_eq!(
        harness.handle.snapshot().await.expect("snapshot").routes_created,
        1
    );
}

#[tokio::test]
async fn interrupt_without_current_operation_is_a_no_op() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.handle.interrupt().expect("interrupt");

    harness.assert_quiet().await;
    assert!(harness.launcher.worker(0).delivered().is_empty());
    assert!(harness.handle.is_running());
}

#[tokio::test]
async fn interrupt_after_completion_is_a_no_op() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(1, "1+1");
    harness.take(5).await;
    harness.wait_for_idle_slot().await;
    harness.handle.interrupt().expect("interrupt");

    harness.assert_quiet().await;
    let delivered = harness.launcher.worker(0).delivered();
    assert_eq!(delivered.len(), 1);
    assert!(!delivered
        .iter()
        .any(|delivered| matches!(delivered, Delivered::Interrupt { .. })));
}

#[tokio::test]
async fn interrupt_targets_only_the_most_recent_request() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(1, HOLD);
    harness.execute(2, HOLD);
    assert_eq!(
        harness.take(4).await,
        vec![busy(), pyin(1, HOLD), busy(), pyin(2, HOLD)]
    );

    harness.handle.interrupt().expect("interrupt");

    assert_eq!(
        harness.take(3).await,
        vec![
            (Channel::Iopub, MessageContent::pyerr(2, "interrupted")),
            idle(),
            reply(2),
        ]
    );
    harness.assert_quiet().await;
    assert_eq!(
        harness.launcher.worker(0).delivered().last(),
        Some(&Delivered::Interrupt {
            origin: RouteId::new(2),
        })
    );

    // The superseded request stays pending and is no longer interruptible.
    harness.wait_for_idle_slot().await;
    harness.handle.interrupt().expect("interrupt");
    harness.assert_quiet().await;
}

#[tokio::test]
async fn finishing_a_superseded_request_keeps_the_newer_one_interruptible() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(1, HOLD);
    harness.execute(2, HOLD);
    assert_eq!(
        harness.take(4).await,
        vec![busy(), pyin(1, HOLD), busy(), pyin(2, HOLD)]
    );

    harness.launcher.worker(0).release(RouteId::new(1), "done");
    assert_eq!(
        harness.take(3).await,
        vec![
            (Channel::Iopub, MessageContent::pyout_html(1, "done")),
            idle(),
            reply(1),
        ]
    );
    harness.assert_quiet().await;
    assert_eq!(
        harness.handle.snapshot().await.expect("snapshot").current_route,
        Some(RouteId::new(2))
    );

    harness.handle.interrupt().expect("interrupt");

    assert_eq!(
        harness.take(3).await,
        vec![
            (Channel::Iopub, MessageContent::pyerr(2, "interrupted")),
            idle(),
            reply(2),
        ]
    );
    assert_eq!(
        harness.launcher.worker(0).delivered().last(),
        Some(&Delivered::Interrupt {
            origin: RouteId::new(2),
        })
    );
}

#[tokio::test]
async fn crashed_worker_is_replaced_and_serves_the_next_request() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.execute(1, HOLD);
    harness.take(2).await;
    harness.launcher.crash(0);
    harness.wait_for_launches(2).await;

    harness.execute(2, "1+1");
    assert_eq!(
        harness.take(5).await,
        vec![
            busy(),
            pyin(2, "1+1"),
            (Channel::Iopub, MessageContent::pyout_html(2, "2")),
            idle(),
            reply(2),
        ]
    );
    harness.assert_quiet().await;

    let snapshot = harness.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.worker_id, Some(WorkerId::new("worker-2")));
    assert_eq!(snapshot.lifecycle.terminations_observed_total, 1);
    assert_eq!(harness.launcher.worker(1).delivered().len(), 1);
    assert_eq!(harness.launcher.released(), vec!["placement-1".to_owned()]);
}

#[tokio::test]
async fn orphaned_execution_reports_an_error_when_configured() {
    let mut harness = Harness::start(
        ScriptedLauncher::default(),
        SupervisorConfig {
            orphan_policy: OrphanPolicy::ReportError,
            ..config()
        },
    )
    .await;

    harness.execute(1, HOLD);
    harness.take(2).await;
    harness.launcher.crash(0);

    assert_eq!(
        harness.take(3).await,
        vec![
            (
                Channel::Iopub,
                MessageContent::pyerr(1, "kernel worker terminated")
            ),
            idle(),
            reply(1),
        ]
    );
}

#[tokio::test]
async fn restart_replaces_the_worker_and_keeps_serving() {
    let mut harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.handle.restart().expect("restart");
    harness.wait_for_launches(2).await;

    harness.execute(1, "1+1");
    assert_eq!(harness.take(5).await.last(), Some(&reply(1)));
    assert!(harness.launcher.worker(0).is_terminated());
    assert!(harness.launcher.worker(0).delivered().is_empty());
    assert_eq!(harness.launcher.worker(1).delivered().len(), 1);

    let snapshot = harness.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.lifecycle.terminations_observed_total, 0);
    assert_eq!(snapshot.lifecycle.teardowns_total, 1);
}

#[tokio::test]
async fn failed_respawn_stops_the_supervisor() {
    let harness = Harness::start(
        ScriptedLauncher {
            launch_budget: Some(1),
            ..ScriptedLauncher::default()
        },
        config(),
    )
    .await;

    assert_eq!(harness.handle.state(), SupervisorState::Ready);
    harness.launcher.crash(0);

    timeout(TEST_TIMEOUT, harness.handle.stopped())
        .await
        .expect("stopped resolves once respawn gives up");
    assert_eq!(harness.handle.state(), SupervisorState::Terminated);
    assert!(!harness.handle.is_running());
    let result = timeout(TEST_TIMEOUT, harness.handle.join())
        .await
        .expect("supervisor stop timeout");
    assert!(matches!(result, Err(KernelError::Launch(_))));
    assert_eq!(harness.launcher.launch_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        harness.handle.interrupt(),
        Err(KernelError::SupervisorStopped)
    );
}

#[tokio::test]
async fn shutdown_releases_the_worker_and_rejects_later_requests() {
    let harness = Harness::start(ScriptedLauncher::default(), config()).await;

    harness.handle.shutdown().expect("shutdown");
    timeout(TEST_TIMEOUT, harness.handle.join())
        .await
        .expect("supervisor stop timeout")
        .expect("clean shutdown");

    assert!(harness.launcher.worker(0).is_terminated());
    assert_eq!(harness.launcher.released(), vec!["placement-1".to_owned()]);
    assert!(!harness.handle.is_running());
    assert_eq!(
        harness
            .handle
            .session_request(identity(1), Request::execute(1, "1+1")),
        Err(KernelError::SupervisorStopped)
    );
    assert_eq!(
        harness.handle.snapshot().await,
        Err(KernelError::SupervisorStopped)
    );
}

#[tokio::test]
async fn startup_fails_when_placement_times_out() {
    let launcher = Arc::new(ScriptedLauncher {
        placement_delay: Some(Duration::from_secs(5)),
        ..ScriptedLauncher::default()
    });
    let (binder, _outbound) = bound_binder();

    let error = Supervisor::start(
        launcher.clone(),
        &binder,
        SupervisorConfig {
            lifecycle: WorkerLifecycleConfig {
                placement_timeout: Duration::from_millis(50),
                ..WorkerLifecycleConfig::default()
            },
            ..config()
        },
    )
    .await
    .err()
    .expect("placement should time out");

    assert_eq!(error, KernelError::PlacementTimeout(Duration::from_millis(50)));
    assert!(error.is_startup_timeout());
    assert_eq!(launcher.launched(), 0);
}

#[tokio::test]
async fn startup_fails_and_tears_down_when_channels_never_bind() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let binder = ChannelBinder::new();
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    binder.bind(
        Channel::Shell,
        Arc::new(RecordingSink {
            channel: Channel::Shell,
            outbound: outbound_tx,
        }),
    );

    let error = Supervisor::start(
        launcher.clone(),
        &binder,
        SupervisorConfig {
            channel_bind_timeout: Duration::from_millis(50),
            ..config()
        },
    )
    .await
    .err()
    .expect("binding should time out");

    assert_eq!(error, KernelError::ChannelBindTimeout(Duration::from_millis(50)));
    assert_eq!(launcher.launched(), 1);
    assert!(launcher.worker(0).is_terminated());
    assert_eq!(launcher.released(), vec!["placement-1".to_owned()]);
}

#[tokio::test]
async fn startup_waits_for_channels_bound_later() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let binder = ChannelBinder::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let late_binder = binder.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        for channel in [Channel::Shell, Channel::Iopub] {
            late_binder.bind(
                channel,
                Arc::new(RecordingSink {
                    channel,
                    outbound: outbound_tx.clone(),
                }),
            );
        }
    });

    let handle = Supervisor::start(launcher, &binder, config())
        .await
        .expect("start supervisor");
    handle
        .session_request(identity(1), Request::execute(1, "1+1"))
        .expect("submit execute");

    let (channel, message) = timeout(TEST_TIMEOUT, outbound_rx.recv())
        .await
        .expect("outbound message timeout")
        .expect("outbound channel open");
    assert_eq!(channel, Channel::Iopub);
    assert_eq!(message.content, MessageContent::status(ExecutionState::Busy));
}
