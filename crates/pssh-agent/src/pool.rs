//! Bounded agent connection pool
//!
//! A counting semaphore caps open connections; idle connections sit on a
//! free list and are reused before a new one is dialed. Connections are
//! created lazily, so a run whose hosts never consult the agent never
//! opens the socket.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use russh_keys::key::PublicKey;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

use crate::connection::{AgentConnection, SignatureFlags};
use crate::dial::AgentDialer;
use crate::error::AgentError;

/// Pool of connections to the local agent
pub struct AgentPool<D: AgentDialer> {
    dialer: D,
    tokens: Arc<Semaphore>,
    idle: Mutex<Vec<D::Conn>>,
    signers: RwLock<Option<Vec<PublicKey>>>,
}

/// An acquired agent connection.
///
/// Hand it back with [`AgentPool::release`]. Dropping it instead closes
/// the connection; its admission token is returned either way.
pub struct PooledAgent<C> {
    conn: C,
    permit: OwnedSemaphorePermit,
}

impl<C> PooledAgent<C> {
    /// Split into the connection and its admission token
    pub fn into_parts(self) -> (C, OwnedSemaphorePermit) {
        (self.conn, self.permit)
    }

    /// Reassemble a lease split by [`PooledAgent::into_parts`]
    pub fn from_parts(conn: C, permit: OwnedSemaphorePermit) -> Self {
        Self { conn, permit }
    }
}

impl<C> Deref for PooledAgent<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledAgent<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<D: AgentDialer> AgentPool<D> {
    /// Create a pool allowing at most `max` open connections (0 means 1)
    pub fn new(dialer: D, max: usize) -> Self {
        Self {
            dialer,
            tokens: Arc::new(Semaphore::new(max.max(1))),
            idle: Mutex::new(Vec::new()),
            signers: RwLock::new(None),
        }
    }

    /// Number of connections waiting on the free list
    pub fn idle_count(&self) -> usize {
        self.idle_list().len()
    }

    fn idle_list(&self) -> MutexGuard<'_, Vec<D::Conn>> {
        // A panic while holding the lock cannot leave the Vec half-updated
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a connection, waiting while `max` are already out.
    pub async fn acquire(&self) -> Result<PooledAgent<D::Conn>, AgentError> {
        let permit = match Arc::clone(&self.tokens).acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed
            Err(_) => return Err(AgentError::Refused("acquire")),
        };

        let reused = self.idle_list().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                tracing::debug!("Dialing new agent connection");
                // On failure the permit drops here and frees the slot
                self.dialer.dial().await?
            }
        };

        Ok(PooledAgent { conn, permit })
    }

    /// Return a healthy connection for reuse
    pub fn release(&self, lease: PooledAgent<D::Conn>) {
        let (conn, permit) = lease.into_parts();
        self.idle_list().push(conn);
        drop(permit);
    }

    /// Close a connection that failed instead of reusing it
    pub fn discard(&self, lease: PooledAgent<D::Conn>) {
        tracing::debug!("Discarding agent connection");
        drop(lease);
    }

    /// Identities held by the agent
    pub async fn list(&self) -> Result<Vec<PublicKey>, AgentError> {
        let mut lease = self.acquire().await?;
        match lease.request_identities().await {
            Ok(keys) => {
                self.release(lease);
                Ok(keys)
            }
            Err(e) => {
                self.discard(lease);
                Err(e)
            }
        }
    }

    /// Sign `data` with `key`
    pub async fn sign(&self, key: &PublicKey, data: &[u8]) -> Result<Vec<u8>, AgentError> {
        self.sign_with_flags(key, data, SignatureFlags::Default)
            .await
    }

    /// Sign `data` with `key`, choosing the RSA signature hash
    pub async fn sign_with_flags(
        &self,
        key: &PublicKey,
        data: &[u8],
        flags: SignatureFlags,
    ) -> Result<Vec<u8>, AgentError> {
        let key = flags.apply(key);
        let (conn, permit) = self.acquire().await?.into_parts();
        let (conn, result) = conn.sign(&key, data).await;
        let lease = PooledAgent::from_parts(conn, permit);
        match result {
            Ok(signature) => {
                self.release(lease);
                Ok(signature)
            }
            Err(e) => {
                self.discard(lease);
                Err(e)
            }
        }
    }

    /// Forward an extension request
    pub async fn extension(&self, typ: &[u8], contents: &[u8]) -> Result<(), AgentError> {
        let mut lease = self.acquire().await?;
        match lease.extension(typ, contents).await {
            Ok(()) => {
                self.release(lease);
                Ok(())
            }
            Err(e) => {
                self.discard(lease);
                Err(e)
            }
        }
    }

    /// Agent identities, queried once and then served from memory
    pub async fn signers(&self) -> Result<Vec<PublicKey>, AgentError> {
        if let Some(keys) = self.signers.read().await.as_ref() {
            return Ok(keys.clone());
        }

        let mut cached = self.signers.write().await;
        if let Some(keys) = cached.as_ref() {
            return Ok(keys.clone());
        }

        let keys = self.list().await?;
        tracing::debug!("Agent holds {} identities", keys.len());
        *cached = Some(keys.clone());
        Ok(keys)
    }

    /// Adding keys through the pool is not supported
    pub async fn add(&self, _key: &PublicKey) -> Result<(), AgentError> {
        Err(AgentError::NotImplemented("add"))
    }

    /// Removing keys through the pool is not supported
    pub async fn remove(&self, _key: &PublicKey) -> Result<(), AgentError> {
        Err(AgentError::NotImplemented("remove"))
    }

    /// Removing keys through the pool is not supported
    pub async fn remove_all(&self) -> Result<(), AgentError> {
        Err(AgentError::NotImplemented("remove all"))
    }

    /// Locking the agent through the pool is not supported
    pub async fn lock(&self, _passphrase: &[u8]) -> Result<(), AgentError> {
        Err(AgentError::NotImplemented("lock"))
    }

    /// Unlocking the agent through the pool is not supported
    pub async fn unlock(&self, _passphrase: &[u8]) -> Result<(), AgentError> {
        Err(AgentError::NotImplemented("unlock"))
    }
}
