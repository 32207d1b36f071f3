//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::backoff::BackoffConfig;
use super::serde_utils::duration_secs;
use crate::types::{expand_tilde, ConnectFailurePolicy};

/// Identity files tried when none are configured
const DEFAULT_IDENTITY_FILES: &[&str] = &[
    "~/.ssh/id_rsa",
    "~/.ssh/id_ecdsa",
    "~/.ssh/id_ed25519",
];

/// Everything one invocation needs, merged from the config file and flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of hosts connecting at once (0 = unlimited)
    pub concurrency: usize,

    /// Maximum number of simultaneous connections to the agent socket
    pub max_agent_conns: usize,

    /// Remote user name
    pub user: String,

    /// File listing the target hosts
    pub hosts_file: PathBuf,

    /// Print results in host-list order instead of as they complete
    pub sort: bool,

    /// Print a `host  result code N` line before each result
    pub show_hostname: bool,

    /// Colour the result header, errors and stderr
    pub color: bool,

    /// Accept any host key instead of consulting known_hosts
    pub insecure: bool,

    /// Verbose logging
    pub debug: bool,

    /// Bound on TCP connect plus SSH handshake and authentication
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Allowed key exchange, cipher and MAC algorithms
    pub algorithms: SshAlgorithms,

    /// Private key files, `~` is expanded
    pub identity_files: Vec<String>,

    /// Only authenticate with identity files, never the agent
    pub identity_only: bool,

    /// Forward local stdin to every remote command
    pub stdin: bool,

    /// Path to the agent's Unix socket
    pub agent_socket: Option<PathBuf>,

    /// known_hosts file, defaults to `~/.ssh/known_hosts`
    pub known_hosts: Option<PathBuf>,

    /// Whether one unreachable host aborts the run
    pub on_connect_error: ConnectFailurePolicy,

    /// Retry schedule for dialing the agent socket
    pub agent_backoff: BackoffConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            max_agent_conns: 50,
            user: whoami::username(),
            hosts_file: PathBuf::from("hosts"),
            sort: false,
            show_hostname: true,
            color: true,
            insecure: false,
            debug: false,
            timeout: Duration::from_secs(5),
            algorithms: SshAlgorithms::default(),
            identity_files: DEFAULT_IDENTITY_FILES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            identity_only: false,
            stdin: false,
            agent_socket: std::env::var_os("SSH_AUTH_SOCK")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            known_hosts: None,
            on_connect_error: ConnectFailurePolicy::default(),
            agent_backoff: BackoffConfig::default(),
        }
    }
}

impl RunConfig {
    /// Identity file paths with `~` expanded
    pub fn identity_paths(&self) -> Vec<PathBuf> {
        self.identity_files
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| expand_tilde(p))
            .collect()
    }

    /// known_hosts file to consult when host keys are verified
    pub fn known_hosts_path(&self) -> PathBuf {
        self.known_hosts
            .clone()
            .unwrap_or_else(|| expand_tilde("~/.ssh/known_hosts"))
    }

    /// Agent socket to use, or `None` when agent auth is disabled
    pub fn agent_socket(&self) -> Option<&PathBuf> {
        if self.identity_only {
            return None;
        }
        self.agent_socket
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// SSH algorithm allow-lists; an empty list keeps the library defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshAlgorithms {
    /// Key exchange algorithms, e.g. `curve25519-sha256`
    pub kex: Vec<String>,
    /// Ciphers, e.g. `chacha20-poly1305@openssh.com`
    pub ciphers: Vec<String>,
    /// MACs, e.g. `hmac-sha2-256`
    pub macs: Vec<String>,
}
