//! The seams between the runner and the SSH implementation

use async_trait::async_trait;
use pssh_core::HostAddr;
use tokio::io::AsyncRead;

use crate::error::{ConnectError, RunError, SessionError};

/// Opens authenticated connections to hosts
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: SshClient;

    /// Dial, handshake and authenticate
    async fn connect(&self, host: &HostAddr) -> Result<Self::Client, ConnectError>;
}

/// One authenticated connection
#[async_trait]
pub trait SshClient: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Open a new session channel
    async fn open_session(&self) -> Result<Self::Session, SessionError>;

    /// Disconnect; errors are ignored
    async fn close(&self);
}

/// A session channel able to run one command
#[async_trait]
pub trait RemoteSession: Send + 'static {
    type Pipe: AsyncRead + Unpin + Send + 'static;

    /// Reader for remote stdout; may be taken once
    fn stdout_pipe(&mut self) -> Result<Self::Pipe, SessionError>;

    /// Reader for remote stderr; may be taken once
    fn stderr_pipe(&mut self) -> Result<Self::Pipe, SessionError>;

    /// Send `stdin`, run `command` and wait for it to exit.
    ///
    /// Both pipes reach end-of-file once this returns.
    async fn run(&mut self, command: &str, stdin: &[u8]) -> Result<(), RunError>;
}
