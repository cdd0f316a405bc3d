use kernel_channels::KernelChannels;
use kernel_protocol::{
    ExecutionState, MessageContent, OrphanPolicy, OutboundMessage, Request, Response, RouteId,
    SessionIdentity,
};
use tokio::sync::mpsc;

const WORKER_TERMINATED_MESSAGE: &str = "kernel worker terminated";

/// Which state machine handles a request's responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Execution { counter: u64 },
    Completion,
    ObjectInfo,
}

impl RouteKind {
    pub fn for_request(request: &Request) -> Self {
        match request {
            Request::Execute { counter, .. } => Self::Execution { counter: *counter },
            Request::Completion { .. } => Self::Completion,
            Request::ObjectInfo { .. } => Self::ObjectInfo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Completed,
    Orphaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteStep {
    Continue,
    Terminate,
}

/// Short-lived handler bound to exactly one outstanding request.
pub struct ResponseRoute {
    id: RouteId,
    kind: RouteKind,
    identity: SessionIdentity,
    channels: KernelChannels,
    orphan_policy: OrphanPolicy,
}

impl ResponseRoute {
    pub fn new(
        id: RouteId,
        kind: RouteKind,
        identity: SessionIdentity,
        channels: KernelChannels,
        orphan_policy: OrphanPolicy,
    ) -> Self {
        Self {
            id,
            kind,
            identity,
            channels,
            orphan_policy,
        }
    }

    /// Consume responses until the terminal one, or until every sender of
    /// the mailbox is gone.
    pub async fn run(self, mut mailbox: mpsc::UnboundedReceiver<Response>) -> RouteOutcome {
        while let Some(response) = mailbox.recv().await {
            if self.handle(response) == RouteStep::Terminate {
                tracing::debug!(route_id = %self.id, kind = ?self.kind, "route completed");
                return RouteOutcome::Completed;
            }
        }
        self.orphaned()
    }

    fn handle(&self, response: Response) -> RouteStep {
        match self.kind {
            RouteKind::Execution { counter } => self.handle_execution(counter, response),
            RouteKind::Completion => self.handle_completion(response),
            RouteKind::ObjectInfo => self.handle_object_info(response),
        }
    }

    fn handle_execution(&self, counter: u64, response: Response) -> RouteStep {
        match response {
            Response::Stream { data, name } => {
                self.emit(MessageContent::Stream { data, name });
                RouteStep::Continue
            }
            Response::ExecuteResult { html } => {
                self.emit(MessageContent::pyout_html(counter, html));
                self.finish_execution(counter)
            }
            Response::Error {
                message,
                incomplete: true,
            } => {
                tracing::debug!(
                    route_id = %self.id,
                    counter,
                    message = message.as_str(),
                    "incomplete input"
                );
                self.emit(MessageContent::pyincomplete(counter));
                self.finish_execution(counter)
            }
            Response::Error {
                message,
                incomplete: false,
            } => {
                self.emit(MessageContent::pyerr(counter, message));
                self.finish_execution(counter)
            }
            unexpected @ (Response::CompletionResult { .. }
            | Response::ObjectInfoResult { .. }) => self.ignore(&unexpected),
        }
    }

    fn handle_completion(&self, response: Response) -> RouteStep {
        match response {
            Response::CompletionResult {
                candidates,
                matched_text,
                ..
            } => {
                self.emit(MessageContent::CompleteReply {
                    matched_text,
                    matches: candidates,
                });
                RouteStep::Terminate
            }
            unexpected => self.ignore(&unexpected),
        }
    }

    fn handle_object_info(&self, response: Response) -> RouteStep {
        match response {
            Response::ObjectInfoResult {
                found,
                name,
                call_def,
                call_docstring,
            } => {
                self.emit(MessageContent::ObjectInfoReply {
                    found,
                    name,
                    call_def,
                    call_docstring,
                });
                RouteStep::Terminate
            }
            unexpected => self.ignore(&unexpected),
        }
    }

    /// `idle` then the shell acknowledgement close every execution.
    fn finish_execution(&self, counter: u64) -> RouteStep {
        self.emit(MessageContent::status(ExecutionState::Idle));
        self.emit(MessageContent::ExecuteReply {
            execution_count: counter,
        });
        RouteStep::Terminate
    }

    fn ignore(&self, response: &Response) -> RouteStep {
        tracing::warn!(
            route_id = %self.id,
            kind = ?self.kind,
            response = ?response,
            "ignoring response that does not belong to this route"
        );
        RouteStep::Continue
    }

    fn orphaned(&self) -> RouteOutcome {
        tracing::warn!(
            route_id = %self.id,
            kind = ?self.kind,
            policy = ?self.orphan_policy,
            "route mailbox closed before a terminal response"
        );
        if self.orphan_policy == OrphanPolicy::ReportError {
            if let RouteKind::Execution { counter } = self.kind {
                self.handle_execution(counter, Response::error(WORKER_TERMINATED_MESSAGE, false));
            }
        }
        RouteOutcome::Orphaned
    }

    fn emit(&self, content: MessageContent) {
        self.channels
            .emit(OutboundMessage::new(self.identity.clone(), content));
    }
}
