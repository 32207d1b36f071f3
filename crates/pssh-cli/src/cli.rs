//! Command-line flags layered over the config file

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pssh_core::config::RunConfig;
use pssh_core::ConnectFailurePolicy;

#[derive(Parser, Debug)]
#[command(name = "pssh")]
#[command(author, version, about = "Run one command on many hosts over SSH in parallel")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PSSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hosts connecting at once (0 = no limit)
    #[arg(short = 'p', long)]
    pub concurrency: Option<usize>,

    /// Maximum simultaneous connections to the SSH agent
    #[arg(long)]
    pub agent_conns: Option<usize>,

    /// Remote user
    #[arg(short, long)]
    pub user: Option<String>,

    /// File listing hosts, `host` or `host:port` separated by whitespace
    #[arg(short = 'H', long)]
    pub hosts: Option<PathBuf>,

    /// Print results in host-file order
    #[arg(short, long)]
    pub sort: bool,

    /// Print a header line before each host's output
    #[arg(short = 'n', long, overrides_with = "no_hostname")]
    pub show_hostname: bool,

    /// Print only the remote output
    #[arg(long)]
    pub no_hostname: bool,

    /// Colour output when stdout is a terminal
    #[arg(long, overrides_with = "no_color")]
    pub color: bool,

    /// Never colour output
    #[arg(long)]
    pub no_color: bool,

    /// Accept any host key
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// Verbose logging on stderr
    #[arg(short, long)]
    pub debug: bool,

    /// Connect and login timeout, in seconds (`5`, `2.5`, `1500ms`)
    #[arg(short, long, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Allowed key exchange algorithms, comma separated
    #[arg(long, value_delimiter = ',')]
    pub kex: Vec<String>,

    /// Allowed ciphers, comma separated
    #[arg(long, value_delimiter = ',')]
    pub ciphers: Vec<String>,

    /// Allowed MACs, comma separated
    #[arg(long, value_delimiter = ',')]
    pub macs: Vec<String>,

    /// Private key files, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub identity: Vec<String>,

    /// Never use the SSH agent
    #[arg(long)]
    pub identity_only: bool,

    /// Forward local stdin to every command (automatic when stdin is piped)
    #[arg(long)]
    pub stdin: bool,

    /// SSH agent socket
    #[arg(long, env = "SSH_AUTH_SOCK")]
    pub agent_socket: Option<PathBuf>,

    /// What an unreachable host does to the run: abort or isolate
    #[arg(long)]
    pub on_connect_error: Option<ConnectFailurePolicy>,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let (number, scale) = match value.strip_suffix("ms") {
        Some(ms) => (ms, 0.001),
        None => (value.strip_suffix('s').unwrap_or(value), 1.0),
    };
    let seconds: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid timeout '{}'", value))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("timeout must be positive, got '{}'", value));
    }
    Ok(Duration::from_secs_f64(seconds * scale))
}

impl Cli {
    /// Override `config` with every flag that was given
    pub fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(agent_conns) = self.agent_conns {
            config.max_agent_conns = agent_conns;
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(hosts) = &self.hosts {
            config.hosts_file = hosts.clone();
        }
        if self.sort {
            config.sort = true;
        }
        if self.show_hostname {
            config.show_hostname = true;
        }
        if self.no_hostname {
            config.show_hostname = false;
        }
        if self.color {
            config.color = true;
        }
        if self.no_color {
            config.color = false;
        }
        if self.insecure {
            config.insecure = true;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if !self.kex.is_empty() {
            config.algorithms.kex = self.kex.clone();
        }
        if !self.ciphers.is_empty() {
            config.algorithms.ciphers = self.ciphers.clone();
        }
        if !self.macs.is_empty() {
            config.algorithms.macs = self.macs.clone();
        }
        if !self.identity.is_empty() {
            config.identity_files = self.identity.clone();
        }
        if self.identity_only {
            config.identity_only = true;
        }
        if self.stdin {
            config.stdin = true;
        }
        if let Some(socket) = &self.agent_socket {
            config.agent_socket = Some(socket.clone());
        }
        if let Some(policy) = self.on_connect_error {
            config.on_connect_error = policy;
        }
        config
    }
}
