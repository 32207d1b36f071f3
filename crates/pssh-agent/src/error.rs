//! Agent error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors talking to the local agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent socket could not be reached
    #[error("dial agent socket {path}: {source}")]
    Dial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The agent answered with a failure or a malformed message
    #[error("agent protocol error: {0}")]
    Protocol(#[from] russh_keys::Error),

    /// The agent refused the request
    #[error("agent refused {0}")]
    Refused(&'static str),

    /// The SSH session went away while it waited for a signature
    #[error(transparent)]
    Session(#[from] russh::SendError),

    /// Operation the pool deliberately does not offer
    #[error("{0} not implemented")]
    NotImplemented(&'static str),
}
