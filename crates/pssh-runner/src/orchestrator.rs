//! Driving one invocation end to end

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use pssh_agent::{AgentPool, UnixSocketDialer};
use pssh_core::config::RunConfig;
use pssh_core::{read_hosts, CommandInput, ConnectFailurePolicy, HostAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::RunnerError;
use crate::printer::{paint_for, Paint, Printer};
use crate::result::ResultBuffers;
use crate::ssh::{client_config, load_identities, HostKeyPolicy, SshConnector};
use crate::transport::Connector;
use crate::worker::{ConnectEvent, Worker, WorkerContext};

/// Commands queued per worker
const INBOX_CAPACITY: usize = 1;

/// Knobs of a run that do not concern the transport
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Hosts connecting at once, 0 for no limit
    pub concurrency: usize,
    /// Print in host order
    pub sort: bool,
    /// Print a header line per host
    pub show_hostname: bool,
    pub on_connect_error: ConnectFailurePolicy,
}

impl From<&RunConfig> for RunSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            sort: config.sort,
            show_hostname: config.show_hostname,
            on_connect_error: config.on_connect_error,
        }
    }
}

/// Runs one command on many hosts
pub struct Runner<C> {
    connector: Arc<C>,
    settings: RunSettings,
    paint: Arc<dyn Paint>,
}

impl<C: Connector> Runner<C> {
    pub fn new(connector: C, settings: RunSettings, paint: Arc<dyn Paint>) -> Self {
        Self {
            connector: Arc::new(connector),
            settings,
            paint,
        }
    }

    /// Run `input` on every host, print to `out` and return the exit code
    pub async fn run<W: Write>(&self, hosts: &[HostAddr], input: CommandInput, out: W) -> i32 {
        if hosts.is_empty() {
            tracing::warn!("No hosts to run on");
            return 0;
        }

        let cancel = CancellationToken::new();
        let buffers = ResultBuffers::new();
        let (results_tx, mut results_rx) = mpsc::channel(hosts.len());
        let (events_tx, events_rx) = mpsc::channel(hosts.len());
        let admission = (self.settings.concurrency > 0)
            .then(|| Arc::new(Semaphore::new(self.settings.concurrency)));

        let ctx = WorkerContext {
            connector: Arc::clone(&self.connector),
            admission,
            buffers: Arc::clone(&buffers),
            results: results_tx,
            events: events_tx,
            cancel: cancel.clone(),
        };

        let mut workers = JoinSet::new();
        let mut inboxes = Vec::with_capacity(hosts.len());
        for (index, host) in hosts.iter().enumerate() {
            let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
            inboxes.push(inbox_tx);
            workers.spawn(Worker::new(index, host.clone(), inbox_rx, ctx.clone()).run());
        }
        // Queues close once every worker is gone
        drop(ctx);

        let watcher = tokio::spawn(watch_connections(
            events_rx,
            self.settings.on_connect_error,
            cancel.clone(),
        ));

        tracing::debug!("Running {:?} on {} hosts", input.command, hosts.len());
        broadcast(inboxes, Arc::new(input), &cancel).await;

        let mut printer = Printer::new(
            out,
            Arc::clone(&self.paint),
            hosts.to_vec(),
            self.settings.show_hostname,
            buffers,
        );
        let code = if self.settings.sort {
            printer.print_sorted(&mut results_rx, &cancel).await
        } else {
            printer
                .print_stream(&mut results_rx, hosts.len(), &cancel)
                .await
        };

        cancel.cancel();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Worker task failed: {}", e);
            }
        }
        if let Err(e) = watcher.await {
            tracing::warn!("Connection watcher failed: {}", e);
        }

        code
    }
}

/// Send the command to every worker, then close the inboxes
async fn broadcast(
    inboxes: Vec<mpsc::Sender<Arc<CommandInput>>>,
    input: Arc<CommandInput>,
    cancel: &CancellationToken,
) {
    for inbox in inboxes {
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = inbox.send(Arc::clone(&input)) => {
                if sent.is_err() {
                    tracing::debug!("Worker exited before receiving the command");
                }
            }
        }
    }
}

/// React to failed connections according to `policy`
async fn watch_connections(
    mut events: mpsc::Receiver<ConnectEvent>,
    policy: ConnectFailurePolicy,
    cancel: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        let Some(err) = event.error else {
            tracing::debug!("[{}] {} connected", event.index, event.host);
            continue;
        };
        match policy {
            ConnectFailurePolicy::Abort => {
                tracing::error!("{}: {}", event.host, err);
                cancel.cancel();
            }
            ConnectFailurePolicy::Isolate => {
                tracing::warn!("{}: {}", event.host, err);
            }
        }
    }
}

/// Read all of `reader` once, for forwarding to every host
pub async fn read_stdin<R: AsyncRead + Unpin>(mut reader: R) -> Result<Bytes, RunnerError> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(RunnerError::Stdin)?;
    Ok(Bytes::from(data))
}

/// Build everything from `config` and run `command`.
///
/// Local problems (hosts file, known_hosts, algorithm names, stdin) fail
/// before any host is contacted.
pub async fn run_from_config<W: Write>(
    config: &RunConfig,
    command: &[String],
    out: W,
) -> Result<i32, RunnerError> {
    let hosts = read_hosts(&config.hosts_file)?;

    let host_keys = if config.insecure {
        HostKeyPolicy::AcceptAny
    } else {
        let path = config.known_hosts_path();
        HostKeyPolicy::known_hosts(&path)
            .map_err(|source| RunnerError::KnownHosts { path, source })?
    };

    let ssh_config = client_config(&config.algorithms)?;
    let identities = load_identities(&config.identity_paths());
    tracing::debug!("Loaded {} identity files", identities.len());

    let mut connector =
        SshConnector::new(ssh_config, config.user.clone(), config.timeout, host_keys)
            .with_identities(identities);
    if let Some(socket) = config.agent_socket() {
        let dialer = UnixSocketDialer::new(socket.clone(), config.agent_backoff.clone());
        connector = connector.with_agent(Arc::new(AgentPool::new(dialer, config.max_agent_conns)));
    }

    if hosts.is_empty() {
        tracing::warn!("No hosts in {:?}", config.hosts_file);
        return Ok(0);
    }

    let stdin = if config.stdin {
        read_stdin(tokio::io::stdin()).await?
    } else {
        Bytes::new()
    };
    let input = CommandInput::from_args(command, stdin);

    let runner = Runner::new(connector, RunSettings::from(config), paint_for(config.color));
    Ok(runner.run(&hosts, input, out).await)
}
