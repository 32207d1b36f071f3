//! Connections and sessions on top of russh

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use tokio::io::{AsyncWriteExt, DuplexStream};

use super::connector::ClientHandler;
use crate::error::{RunError, SessionError};
use crate::transport::{RemoteSession, SshClient};

/// Bytes buffered between the channel reader and an output pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// SSH `extended data` type code for stderr
const EXTENDED_DATA_STDERR: u32 = 1;

/// Exit code reported for a command killed by a signal
const SIGNAL_EXIT_BASE: i32 = 128;

/// An authenticated russh connection
pub struct RusshClient {
    handle: Handle<ClientHandler>,
}

impl RusshClient {
    pub(crate) fn new(handle: Handle<ClientHandler>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl SshClient for RusshClient {
    type Session = RusshSession;

    async fn open_session(&self) -> Result<RusshSession, SessionError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| match e {
                russh::Error::Disconnect => SessionError::Closed,
                other => SessionError::Ssh(other),
            })?;
        Ok(RusshSession::new(channel))
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect failed: {}", e);
        }
    }
}

/// One session channel with its output pipes
pub struct RusshSession {
    channel: Channel<Msg>,
    stdout_reader: Option<DuplexStream>,
    stderr_reader: Option<DuplexStream>,
    stdout_writer: Option<DuplexStream>,
    stderr_writer: Option<DuplexStream>,
}

impl RusshSession {
    fn new(channel: Channel<Msg>) -> Self {
        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
        Self {
            channel,
            stdout_reader: Some(stdout_reader),
            stderr_reader: Some(stderr_reader),
            stdout_writer: Some(stdout_writer),
            stderr_writer: Some(stderr_writer),
        }
    }
}

/// Write to a pipe whose reader may have gone away
async fn forward(pipe: &mut Option<DuplexStream>, data: &[u8]) {
    if let Some(writer) = pipe {
        if writer.write_all(data).await.is_err() {
            *pipe = None;
        }
    }
}

/// Conventional number of a signal, for the 128+N exit code
fn signal_number(signal: &Sig) -> Option<i32> {
    let number = match signal {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::USR1 => 10,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        _ => return None,
    };
    Some(number)
}

fn signal_name(signal: &Sig) -> String {
    match signal {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    type Pipe = DuplexStream;

    fn stdout_pipe(&mut self) -> Result<DuplexStream, SessionError> {
        self.stdout_reader
            .take()
            .ok_or(SessionError::PipeTaken("stdout"))
    }

    fn stderr_pipe(&mut self) -> Result<DuplexStream, SessionError> {
        self.stderr_reader
            .take()
            .ok_or(SessionError::PipeTaken("stderr"))
    }

    async fn run(&mut self, command: &str, stdin: &[u8]) -> Result<(), RunError> {
        // Dropped on return, which ends both pipes
        let mut stdout = self.stdout_writer.take();
        let mut stderr = self.stderr_writer.take();

        self.channel.exec(true, command).await?;
        if !stdin.is_empty() {
            self.channel.data(stdin).await?;
        }
        self.channel.eof().await?;

        let mut exit_status = None;
        let mut exit_signal = None;

        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => forward(&mut stdout, data).await,
                ChannelMsg::ExtendedData { ref data, ext } if ext == EXTENDED_DATA_STDERR => {
                    forward(&mut stderr, data).await
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::ExitSignal {
                    signal_name: signal,
                    error_message,
                    ..
                } => {
                    tracing::debug!("Remote command killed by {:?}: {}", signal, error_message);
                    exit_signal = Some(signal);
                }
                ChannelMsg::Failure => return Err(RunError::Refused),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        if let Some(signal) = exit_signal {
            let status = signal_number(&signal)
                .map(|n| SIGNAL_EXIT_BASE + n)
                .unwrap_or(SIGNAL_EXIT_BASE);
            return Err(RunError::Exit {
                status,
                signal: Some(signal_name(&signal)),
            });
        }

        match exit_status {
            Some(0) => Ok(()),
            Some(status) => Err(RunError::Exit {
                status: status as i32,
                signal: None,
            }),
            None => Err(RunError::MissingExitStatus),
        }
    }
}
