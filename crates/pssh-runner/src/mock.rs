//! In-memory transport for unit tests

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use pssh_core::HostAddr;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};

use crate::error::{ConnectError, RunError, SessionError};
use crate::transport::{Connector, RemoteSession, SshClient};

/// How a scripted command ends
#[derive(Debug, Clone)]
pub enum Outcome {
    Exit(i32),
    Fail(String),
    Hang,
}

/// Behaviour of one host
#[derive(Debug, Clone)]
pub struct Script {
    pub connect_error: Option<String>,
    pub connect_delay: Duration,
    pub session_error: bool,
    /// Pipe (`"stdout"` or `"stderr"`) that cannot be opened
    pub pipe_error: Option<&'static str>,
    /// Remote stdout resets instead of reaching end-of-file
    pub stdout_reset: bool,
    pub run_delay: Duration,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: Outcome,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_error: None,
            connect_delay: Duration::ZERO,
            session_error: false,
            pipe_error: None,
            stdout_reset: false,
            run_delay: Duration::ZERO,
            stdout: Vec::new(),
            stderr: Vec::new(),
            outcome: Outcome::Exit(0),
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub connected: AtomicUsize,
    pub peak: AtomicUsize,
    pub closed: AtomicUsize,
}

#[derive(Default)]
pub struct MockConnector {
    scripts: HashMap<String, Script>,
    pub stats: Arc<Stats>,
}

impl MockConnector {
    pub fn with(mut self, host: &str, script: Script) -> Self {
        self.scripts
            .insert(HostAddr::parse(host).to_string(), script);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Client = MockClient;

    async fn connect(&self, host: &HostAddr) -> Result<MockClient, ConnectError> {
        let script = self.scripts.get(host.as_str()).cloned().unwrap_or_default();
        tokio::time::sleep(script.connect_delay).await;
        if let Some(message) = &script.connect_error {
            return Err(ConnectError::Io {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, message.clone()),
            });
        }
        let now = self.stats.connected.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        Ok(MockClient {
            script,
            stats: Arc::clone(&self.stats),
        })
    }
}

pub struct MockClient {
    pub script: Script,
    stats: Arc<Stats>,
}

impl MockClient {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            stats: Arc::default(),
        }
    }
}

#[async_trait]
impl SshClient for MockClient {
    type Session = MockSession;

    async fn open_session(&self) -> Result<MockSession, SessionError> {
        if self.script.session_error {
            return Err(SessionError::Closed);
        }
        let (stdout_writer, stdout_reader) = tokio::io::duplex(16);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(16);
        Ok(MockSession {
            script: self.script.clone(),
            readers: (Some(stdout_reader), Some(stderr_reader)),
            writers: Some((stdout_writer, stderr_writer)),
        })
    }

    async fn close(&self) {
        self.stats.connected.fetch_sub(1, Ordering::SeqCst);
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockSession {
    script: Script,
    readers: (Option<DuplexStream>, Option<DuplexStream>),
    writers: Option<(DuplexStream, DuplexStream)>,
}

impl MockSession {
    fn pipe(&mut self, name: &'static str) -> Result<MockPipe, SessionError> {
        if self.script.pipe_error == Some(name) {
            return Err(SessionError::Closed);
        }
        let reader = if name == "stdout" {
            self.readers.0.take()
        } else {
            self.readers.1.take()
        };
        let inner = reader.ok_or(SessionError::PipeTaken(name))?;
        Ok(MockPipe {
            inner,
            reset_at_eof: name == "stdout" && self.script.stdout_reset,
        })
    }
}

/// Output pipe that can fail once its data is drained
pub struct MockPipe {
    inner: DuplexStream,
    reset_at_eof: bool,
}

impl AsyncRead for MockPipe {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if self.reset_at_eof && buf.filled().len() == before => {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "stream reset",
                )))
            }
            other => other,
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    type Pipe = MockPipe;

    fn stdout_pipe(&mut self) -> Result<MockPipe, SessionError> {
        self.pipe("stdout")
    }

    fn stderr_pipe(&mut self) -> Result<MockPipe, SessionError> {
        self.pipe("stderr")
    }

    async fn run(&mut self, _command: &str, stdin: &[u8]) -> Result<(), RunError> {
        let Some((mut stdout, mut stderr)) = self.writers.take() else {
            return Err(RunError::Refused);
        };
        tokio::time::sleep(self.script.run_delay).await;
        // Small pipes force the copies to run alongside
        stdout.write_all(&self.script.stdout).await?;
        stdout.write_all(stdin).await?;
        stderr.write_all(&self.script.stderr).await?;
        drop((stdout, stderr));

        match &self.script.outcome {
            Outcome::Exit(0) => Ok(()),
            Outcome::Exit(status) => Err(RunError::Exit {
                status: *status,
                signal: None,
            }),
            Outcome::Fail(message) => Err(RunError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                message.clone(),
            ))),
            Outcome::Hang => std::future::pending().await,
        }
    }
}
