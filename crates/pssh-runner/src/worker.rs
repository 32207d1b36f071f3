//! One task per host: connect once, then serve commands

use std::fmt;
use std::sync::Arc;

use pssh_core::{CommandInput, HostAddr};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::ConnectError;
use crate::result::{ErrorOrigin, ExecError, ExecResult, ResultBuffers};
use crate::session;
use crate::transport::{Connector, SshClient};

/// Exit code carried by results of hosts that could not be reached
pub const CONNECT_FAILURE_CODE: i32 = 255;

/// Reported once per worker after its connection attempt
#[derive(Debug)]
pub struct ConnectEvent {
    pub index: usize,
    pub host: HostAddr,
    pub error: Option<ConnectError>,
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Dialing,
    Failed,
    Connected,
    Serving,
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Dialing => "dialing",
            WorkerState::Failed => "failed",
            WorkerState::Connected => "connected",
            WorkerState::Serving => "serving",
            WorkerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared handles every worker of a run gets a clone of
pub struct WorkerContext<C> {
    pub connector: Arc<C>,
    pub admission: Option<Arc<Semaphore>>,
    pub buffers: Arc<ResultBuffers>,
    pub results: mpsc::Sender<ExecResult>,
    pub events: mpsc::Sender<ConnectEvent>,
    pub cancel: CancellationToken,
}

impl<C> Clone for WorkerContext<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            admission: self.admission.clone(),
            buffers: Arc::clone(&self.buffers),
            results: self.results.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// The connection worker for host `index`
pub struct Worker<C> {
    index: usize,
    host: HostAddr,
    inbox: mpsc::Receiver<Arc<CommandInput>>,
    ctx: WorkerContext<C>,
    state: WorkerState,
}

impl<C: Connector> Worker<C> {
    pub fn new(
        index: usize,
        host: HostAddr,
        inbox: mpsc::Receiver<Arc<CommandInput>>,
        ctx: WorkerContext<C>,
    ) -> Self {
        Self {
            index,
            host,
            inbox,
            ctx,
            state: WorkerState::Idle,
        }
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!("[{}] {}: {} -> {}", self.index, self.host, self.state, next);
        self.state = next;
    }

    /// Run until the inbox closes or the run is cancelled
    pub async fn run(mut self) {
        let cancel = self.ctx.cancel.clone();

        // Held until this task returns
        let _permit = match self.ctx.admission.clone() {
            Some(admission) => tokio::select! {
                _ = cancel.cancelled() => return,
                permit = admission.acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
            },
            None => None,
        };

        self.transition(WorkerState::Dialing);
        let connector = Arc::clone(&self.ctx.connector);
        let host = self.host.clone();
        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                self.transition(WorkerState::Closed);
                return;
            }
            connected = connector.connect(&host) => connected,
        };

        match connected {
            Ok(client) => {
                self.transition(WorkerState::Connected);
                self.report(None).await;
                self.serve(&client).await;
                client.close().await;
            }
            Err(e) => {
                self.transition(WorkerState::Failed);
                let message = e.to_string();
                self.report(Some(e)).await;
                self.answer_with_error(&message).await;
            }
        }

        self.transition(WorkerState::Closed);
    }

    async fn report(&self, error: Option<ConnectError>) {
        let event = ConnectEvent {
            index: self.index,
            host: self.host.clone(),
            error,
        };
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => {}
            _ = self.ctx.events.send(event) => {}
        }
    }

    /// Next command, or `None` once the inbox closes or the run is cancelled
    async fn next_command(&mut self) -> Option<Arc<CommandInput>> {
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => None,
            command = self.inbox.recv() => command,
        }
    }

    async fn serve<S: SshClient>(&mut self, client: &S) {
        self.transition(WorkerState::Serving);
        let mut session_index = 0;
        while let Some(input) = self.next_command().await {
            let result = self.ctx.buffers.new_result(self.index, session_index);
            session_index += 1;
            if let Some(result) = session::execute(client, &input, result, &self.ctx.cancel).await {
                session::emit(&self.ctx.results, result, &self.ctx.cancel).await;
            }
        }
    }

    /// Give every command an error result so each host still reports
    async fn answer_with_error(&mut self, message: &str) {
        let mut session_index = 0;
        while self.next_command().await.is_some() {
            let mut result = self.ctx.buffers.new_result(self.index, session_index);
            session_index += 1;
            result.code = CONNECT_FAILURE_CODE;
            result.error = Some(ExecError::new(ErrorOrigin::Connect, message));
            session::emit(&self.ctx.results, result, &self.ctx.cancel).await;
        }
    }
}
