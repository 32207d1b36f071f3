//! Core error types for pssh

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unknown SSH algorithm name in an allow-list
    #[error("Unsupported {kind} algorithm: {name}")]
    UnknownAlgorithm { kind: &'static str, name: String },
}

/// Errors reading the host list
#[derive(Error, Debug)]
pub enum HostsError {
    /// The hosts file could not be read
    #[error("read hosts file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
