//! The agent protocol operations the pool forwards

use async_trait::async_trait;
use russh::CryptoVec;
use russh_keys::agent::client::AgentClient;
use russh_keys::key::{PublicKey, SignatureHash};
use tokio::net::UnixStream;

use crate::error::AgentError;

/// Signature variant requested for RSA keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureFlags {
    /// Whatever hash the key already carries
    #[default]
    Default,
    /// `rsa-sha2-256`
    RsaSha2_256,
    /// `rsa-sha2-512`
    RsaSha2_512,
}

impl SignatureFlags {
    /// Adjust the hash of an RSA key; other key types are returned as is.
    pub fn apply(self, key: &PublicKey) -> PublicKey {
        let mut key = key.clone();
        if let PublicKey::RSA { ref mut hash, .. } = key {
            match self {
                SignatureFlags::Default => {}
                SignatureFlags::RsaSha2_256 => *hash = SignatureHash::SHA2_256,
                SignatureFlags::RsaSha2_512 => *hash = SignatureHash::SHA2_512,
            }
        }
        key
    }
}

/// One open connection to the agent.
///
/// `sign` consumes the connection and hands it back next to the result,
/// matching how the SSH client drives agent signing during auth.
#[async_trait]
pub trait AgentConnection: Send + Sized + 'static {
    /// List the identities the agent holds
    async fn request_identities(&mut self) -> Result<Vec<PublicKey>, AgentError>;

    /// Sign `data` with `key`, returning the encoded signature
    async fn sign(self, key: &PublicKey, data: &[u8]) -> (Self, Result<Vec<u8>, AgentError>);

    /// Send a protocol extension request
    async fn extension(&mut self, typ: &[u8], contents: &[u8]) -> Result<(), AgentError>;
}

#[async_trait]
impl AgentConnection for AgentClient<UnixStream> {
    async fn request_identities(&mut self) -> Result<Vec<PublicKey>, AgentError> {
        Ok(AgentClient::request_identities(self).await?)
    }

    async fn sign(self, key: &PublicKey, data: &[u8]) -> (Self, Result<Vec<u8>, AgentError>) {
        let (client, result) = self
            .sign_request(key, CryptoVec::from_slice(data))
            .await;
        // The agent's signature is appended after the signed payload
        let result = result.map_err(AgentError::from).and_then(|signed| {
            signed
                .get(data.len()..)
                .filter(|sig| !sig.is_empty())
                .map(|sig| sig.to_vec())
                .ok_or(AgentError::Refused("sign"))
        });
        (client, result)
    }

    async fn extension(&mut self, typ: &[u8], contents: &[u8]) -> Result<(), AgentError> {
        Ok(AgentClient::extension(self, typ, contents).await?)
    }
}
