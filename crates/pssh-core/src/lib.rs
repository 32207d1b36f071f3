//! pssh-core: Core types and configuration for pssh
//!
//! This crate provides the host list, command input and configuration
//! structures shared by the agent pool, the execution engine and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ConfigError, HostsError};
pub use types::{read_hosts, CommandInput, ConnectFailurePolicy, HostAddr};
