//! russh-backed transport

mod channel;
mod connector;
mod options;

pub use channel::{RusshClient, RusshSession};
pub use connector::SshConnector;
pub use options::{client_config, load_identities, HostKeyPolicy};
