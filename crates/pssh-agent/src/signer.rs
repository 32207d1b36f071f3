//! Agent signing for SSH public key authentication

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use russh::CryptoVec;
use russh_keys::key::PublicKey;

use crate::dial::AgentDialer;
use crate::error::AgentError;
use crate::pool::AgentPool;

type SignFuture<S> = Pin<Box<dyn Future<Output = (S, Result<CryptoVec, AgentError>)> + Send>>;

/// Signs authentication challenges through an [`AgentPool`].
///
/// Each challenge takes a pooled connection for the single sign request
/// and hands it back before the reply goes to the server.
pub struct PoolSigner<D: AgentDialer> {
    pool: Arc<AgentPool<D>>,
}

impl<D: AgentDialer> PoolSigner<D> {
    pub fn new(pool: Arc<AgentPool<D>>) -> Self {
        Self { pool }
    }
}

impl<D: AgentDialer> Clone for PoolSigner<D> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<D: AgentDialer> russh::Signer for PoolSigner<D> {
    type Error = AgentError;
    type Future = SignFuture<Self>;

    fn auth_publickey_sign(self, key: &PublicKey, to_sign: CryptoVec) -> Self::Future {
        let key = key.clone();
        Box::pin(async move {
            let signature = self.pool.sign(&key, &to_sign).await;
            let result = match signature {
                // The server expects the signature right after the signed data
                Ok(signature) => {
                    let mut signed = to_sign;
                    signed.extend(&signature);
                    Ok(signed)
                }
                Err(e) => {
                    tracing::debug!("Agent could not sign with {}: {}", key.fingerprint(), e);
                    Err(e)
                }
            };
            (self, result)
        })
    }
}
