//! SSH client options: algorithms, host keys and identities

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pssh_core::config::SshAlgorithms;
use pssh_core::ConfigError;
use russh::client::Config;
use russh::{cipher, kex, mac, Preferred};
use russh_keys::key::{KeyPair, PublicKey};

/// Key exchange algorithms accepted in an allow-list
const KEX_ALGORITHMS: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
];

/// Ciphers accepted in an allow-list
const CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

/// MACs accepted in an allow-list
const MACS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

fn select<N>(kind: &'static str, wanted: &[String], known: &[N]) -> Result<Vec<N>, ConfigError>
where
    N: AsRef<str> + Copy,
{
    wanted
        .iter()
        .map(|name| {
            known
                .iter()
                .copied()
                .find(|candidate| candidate.as_ref() == name.as_str())
                .ok_or_else(|| ConfigError::UnknownAlgorithm {
                    kind,
                    name: name.clone(),
                })
        })
        .collect()
}

/// Build the russh client configuration.
///
/// Empty allow-lists keep russh's defaults.
pub fn client_config(algorithms: &SshAlgorithms) -> Result<Config, ConfigError> {
    let mut preferred = Preferred::default();

    if !algorithms.kex.is_empty() {
        preferred.kex = Cow::Owned(select("key exchange", &algorithms.kex, KEX_ALGORITHMS)?);
    }
    if !algorithms.ciphers.is_empty() {
        preferred.cipher = Cow::Owned(select("cipher", &algorithms.ciphers, CIPHERS)?);
    }
    if !algorithms.macs.is_empty() {
        preferred.mac = Cow::Owned(select("MAC", &algorithms.macs, MACS)?);
    }

    Ok(Config {
        preferred,
        ..Default::default()
    })
}

/// How server host keys are checked
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Trust every host key
    AcceptAny,
    /// Require a matching entry in a known_hosts file
    KnownHosts(PathBuf),
}

impl HostKeyPolicy {
    /// Use `path`, failing now if it cannot be read
    pub fn known_hosts(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::File::open(&path)?;
        Ok(HostKeyPolicy::KnownHosts(path))
    }

    /// Whether `key` is acceptable for `host:port`.
    ///
    /// A key that differs from the recorded one is an error, an
    /// unrecorded key is `Ok(false)`.
    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> Result<bool, russh_keys::Error> {
        match self {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts(path) => {
                russh_keys::check_known_hosts_path(host, port, key, path)
            }
        }
    }
}

/// Load private keys, skipping files that are missing or unparsable
pub fn load_identities(paths: &[PathBuf]) -> Vec<Arc<KeyPair>> {
    paths
        .iter()
        .filter_map(|path| match load_identity(path) {
            Ok(key) => {
                tracing::debug!("Loaded identity {:?}", path);
                Some(Arc::new(key))
            }
            Err(e) => {
                tracing::debug!("Skipping identity {:?}: {}", path, e);
                None
            }
        })
        .collect()
}

fn load_identity(path: &Path) -> Result<KeyPair, Box<dyn std::error::Error + Send + Sync>> {
    let data = std::fs::read_to_string(path)?;
    Ok(russh_keys::decode_secret_key(&data, None)?)
}
