//! Runner error types

use std::path::PathBuf;
use std::time::Duration;

use pssh_core::{ConfigError, HostsError};
use thiserror::Error;

/// Failure to reach or log in to one host
#[derive(Error, Debug)]
pub enum ConnectError {
    /// TCP connect or socket I/O failed
    #[error("dial {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect, handshake and authentication did not finish in time
    #[error("dial {host}: timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    /// The server's host key was not accepted
    #[error("host key verification failed for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    /// Every authentication method was refused
    #[error("ssh: unable to authenticate to {host} as {user}, no supported methods remain")]
    AuthRejected { host: String, user: String },

    /// SSH protocol failure during handshake or auth
    #[error("ssh handshake with {host}: {source}")]
    Ssh {
        host: String,
        #[source]
        source: russh::Error,
    },
}

/// Failure to open a session or one of its pipes
#[derive(Error, Debug)]
pub enum SessionError {
    /// SSH protocol failure
    #[error(transparent)]
    Ssh(#[from] russh::Error),

    /// The pipe was already handed out
    #[error("{0} pipe already taken")]
    PipeTaken(&'static str),

    /// The connection is gone
    #[error("connection closed")]
    Closed,
}

/// Failure while running the remote command
#[derive(Error, Debug)]
pub enum RunError {
    /// The remote command exited nonzero or was killed by a signal
    #[error("Process exited with status {status}{}", signal_suffix(.signal))]
    Exit {
        status: i32,
        signal: Option<String>,
    },

    /// The channel closed without reporting an exit status
    #[error("remote command exited without exit status or exit signal")]
    MissingExitStatus,

    /// The server refused to start the command
    #[error("server refused to run the command")]
    Refused,

    /// SSH protocol failure
    #[error(transparent)]
    Ssh(#[from] russh::Error),

    /// Local I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Remote exit status, if the command ran to an exit
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            RunError::Exit { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Local failures that stop a run before any host is contacted
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Hosts file unreadable
    #[error(transparent)]
    Hosts(#[from] HostsError),

    /// Bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// known_hosts required but unreadable
    #[error("cannot read known_hosts file {path}: {source}")]
    KnownHosts {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local stdin could not be read for forwarding
    #[error("read stdin: {0}")]
    Stdin(#[source] std::io::Error),
}

fn signal_suffix(signal: &Option<String>) -> String {
    match signal {
        Some(signal) => format!(" from signal {}", signal),
        None => String::new(),
    }
}
