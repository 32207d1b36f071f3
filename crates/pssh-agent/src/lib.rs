//! pssh-agent: bounded access to the local SSH authentication agent
//!
//! Every host connection in a run authenticates through the same agent
//! socket. The pool caps how many agent connections are open at once,
//! reuses idle ones, and remembers the agent's identity list after the
//! first query.

mod backoff;
mod connection;
mod dial;
mod error;
mod pool;
mod signer;

#[cfg(test)]
mod mock;

pub use backoff::ExponentialBackoff;
pub use connection::{AgentConnection, SignatureFlags};
pub use dial::{dial_with_backoff, is_transient, AgentDialer, UnixSocketDialer};
pub use error::AgentError;
pub use pool::{AgentPool, PooledAgent};
pub use signer::PoolSigner;
