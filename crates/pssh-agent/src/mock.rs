//! In-memory agent for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh_keys::key::{KeyPair, PublicKey};

use crate::connection::AgentConnection;
use crate::dial::AgentDialer;
use crate::error::AgentError;
use crate::pool::AgentPool;

#[derive(Default)]
pub struct Counters {
    pub dials: AtomicUsize,
    pub lists: AtomicUsize,
    pub signs: AtomicUsize,
    pub in_use: AtomicUsize,
    pub peak: AtomicUsize,
}

pub struct MockConn {
    counters: Arc<Counters>,
    keys: Vec<PublicKey>,
    fail: bool,
}

#[async_trait]
impl AgentConnection for MockConn {
    async fn request_identities(&mut self) -> Result<Vec<PublicKey>, AgentError> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile up behind the first query
        tokio::task::yield_now().await;
        if self.fail {
            return Err(AgentError::Refused("list"));
        }
        Ok(self.keys.clone())
    }

    /// Signatures are the payload reversed
    async fn sign(self, _key: &PublicKey, data: &[u8]) -> (Self, Result<Vec<u8>, AgentError>) {
        self.counters.signs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return (self, Err(AgentError::Refused("sign")));
        }
        let mut signature = data.to_vec();
        signature.reverse();
        (self, Ok(signature))
    }

    async fn extension(&mut self, _typ: &[u8], _contents: &[u8]) -> Result<(), AgentError> {
        Ok(())
    }
}

pub struct MockDialer {
    counters: Arc<Counters>,
    keys: Vec<PublicKey>,
    fail: bool,
}

#[async_trait]
impl AgentDialer for MockDialer {
    type Conn = MockConn;

    async fn dial(&self) -> Result<MockConn, AgentError> {
        self.counters.dials.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            counters: Arc::clone(&self.counters),
            keys: self.keys.clone(),
            fail: self.fail,
        })
    }
}

pub fn test_key() -> PublicKey {
    KeyPair::generate_ed25519()
        .unwrap()
        .clone_public_key()
        .unwrap()
}

/// A pool over the mock agent holding one identity
pub fn pool(max: usize, fail: bool) -> (AgentPool<MockDialer>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let dialer = MockDialer {
        counters: Arc::clone(&counters),
        keys: vec![test_key()],
        fail,
    };
    (AgentPool::new(dialer, max), counters)
}
