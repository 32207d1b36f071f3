//! Core domain types

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::HostsError;

/// Port used when a host-list entry carries none
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One `host:port` target of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr(String);

impl HostAddr {
    /// Build an address from a host-list token, appending `:22` when the
    /// token has no port suffix.
    pub fn parse(token: &str) -> Self {
        let has_port = token
            .find(':')
            .map_or(false, |colon| colon + 1 < token.len());
        if has_port {
            Self(token.to_string())
        } else {
            Self(format!("{}:{}", token, DEFAULT_SSH_PORT))
        }
    }

    /// The full `host:port` string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part, without brackets for IPv6 literals
    pub fn host(&self) -> &str {
        let host = match self.0.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.0,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Port part, falling back to 22 when it does not parse
    pub fn port(&self) -> u16 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(DEFAULT_SSH_PORT)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse whitespace-separated host tokens, preserving order.
pub fn parse_hosts(content: &str) -> Vec<HostAddr> {
    content.split_whitespace().map(HostAddr::parse).collect()
}

/// Read the host-list file.
pub fn read_hosts(path: &Path) -> Result<Vec<HostAddr>, HostsError> {
    let content = std::fs::read_to_string(path).map_err(|source| HostsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let hosts = parse_hosts(&content);
    tracing::debug!("Read {} hosts from {:?}", hosts.len(), path);
    Ok(hosts)
}

/// The command broadcast to every host, with its optional stdin payload
#[derive(Debug, Clone, Default)]
pub struct CommandInput {
    /// Shell command line executed remotely
    pub command: String,
    /// Bytes written to the remote stdin before the command runs
    pub stdin: Bytes,
}

impl CommandInput {
    /// Join command-line words with single spaces
    pub fn from_args<I, S>(args: I, stdin: Bytes) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let command = args
            .into_iter()
            .map(|arg| arg.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Self { command, stdin }
    }
}

/// What a failed connection does to the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectFailurePolicy {
    /// Cancel the whole run on the first connection failure
    #[default]
    Abort,
    /// Report the failure on that host's result and keep going
    Isolate,
}

impl FromStr for ConnectFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "isolate" => Ok(Self::Isolate),
            other => Err(format!(
                "unknown connect failure policy '{}' (expected abort or isolate)",
                other
            )),
        }
    }
}

impl fmt::Display for ConnectFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailurePolicy::Abort => write!(f, "abort"),
            ConnectFailurePolicy::Isolate => write!(f, "isolate"),
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
