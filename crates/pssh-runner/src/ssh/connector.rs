//! Dialing and authenticating hosts with russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pssh_agent::{AgentError, AgentPool, PoolSigner, UnixSocketDialer};
use pssh_core::HostAddr;
use russh::client::{self, Config, Handle};
use russh_keys::key::{KeyPair, PublicKey};

use super::channel::RusshClient;
use super::options::HostKeyPolicy;
use crate::error::ConnectError;
use crate::transport::Connector;

/// Connects to hosts and logs in with the agent and identity files
pub struct SshConnector {
    config: Arc<Config>,
    user: String,
    timeout: Duration,
    host_keys: HostKeyPolicy,
    identities: Vec<Arc<KeyPair>>,
    agent: Option<Arc<AgentPool<UnixSocketDialer>>>,
}

impl SshConnector {
    pub fn new(
        config: Config,
        user: impl Into<String>,
        timeout: Duration,
        host_keys: HostKeyPolicy,
    ) -> Self {
        Self {
            config: Arc::new(config),
            user: user.into(),
            timeout,
            host_keys,
            identities: Vec::new(),
            agent: None,
        }
    }

    /// Private keys tried after the agent
    pub fn with_identities(mut self, identities: Vec<Arc<KeyPair>>) -> Self {
        self.identities = identities;
        self
    }

    /// Agent pool tried first
    pub fn with_agent(mut self, agent: Arc<AgentPool<UnixSocketDialer>>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// TCP connect and SSH handshake, bounded by the connect timeout
    async fn handshake(&self, host: &HostAddr) -> Result<Handle<ClientHandler>, ConnectError> {
        let handler = ClientHandler {
            host: host.host().to_string(),
            port: host.port(),
            policy: self.host_keys.clone(),
        };

        tracing::debug!("Connecting to {}", host);
        let connecting = client::connect(Arc::clone(&self.config), host.as_str(), handler);
        match tokio::time::timeout(self.timeout, connecting).await {
            Ok(connected) => connected.map_err(|e| classify(host, e)),
            Err(_) => Err(ConnectError::Timeout {
                host: host.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Log in with the agent first, then each identity file
    async fn authenticate(
        &self,
        host: &HostAddr,
        handle: &mut Handle<ClientHandler>,
    ) -> Result<(), ConnectError> {
        if let Some(agent) = &self.agent {
            match self.authenticate_with_agent(handle, agent).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!("Agent authentication unavailable for {}: {}", host, e),
            }
        }

        for key in &self.identities {
            let accepted = handle
                .authenticate_publickey(self.user.as_str(), Arc::clone(key))
                .await
                .map_err(|e| classify(host, e))?;
            if accepted {
                tracing::debug!("Authenticated to {} with identity file", host);
                return Ok(());
            }
        }

        Err(ConnectError::AuthRejected {
            host: host.to_string(),
            user: self.user.clone(),
        })
    }

    /// Offer each agent identity until one is accepted
    async fn authenticate_with_agent(
        &self,
        handle: &mut Handle<ClientHandler>,
        agent: &Arc<AgentPool<UnixSocketDialer>>,
    ) -> Result<bool, AgentError> {
        let mut signer = PoolSigner::new(Arc::clone(agent));
        for key in agent.signers().await? {
            let (returned, result) = handle
                .authenticate_future(self.user.as_str(), key.clone(), signer)
                .await;
            signer = returned;
            match result {
                Ok(true) => {
                    tracing::debug!("Authenticated with agent key {}", key.fingerprint());
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => tracing::debug!("Agent key {} failed: {}", key.fingerprint(), e),
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Client = RusshClient;

    /// Only the handshake is bounded; authentication may wait on the agent
    async fn connect(&self, host: &HostAddr) -> Result<RusshClient, ConnectError> {
        let mut handle = self.handshake(host).await?;
        self.authenticate(host, &mut handle).await?;
        Ok(RusshClient::new(handle))
    }
}

fn classify(host: &HostAddr, err: russh::Error) -> ConnectError {
    let host = host.to_string();
    match err {
        russh::Error::UnknownKey => ConnectError::HostKeyRejected {
            host,
            reason: "no matching known_hosts entry".to_string(),
        },
        russh::Error::Keys(russh_keys::Error::KeyChanged { line }) => {
            ConnectError::HostKeyRejected {
                host,
                reason: format!("key differs from known_hosts line {}", line),
            }
        }
        russh::Error::IO(source) => ConnectError::Io { host, source },
        source => ConnectError::Ssh { host, source },
    }
}

/// Per-connection russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Host key for {}:{}: {}",
            self.host,
            self.port,
            server_public_key.fingerprint()
        );
        Ok(self.policy.check(&self.host, self.port, server_public_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SshClient;
    use russh::server::{self, Auth};
    use tokio::net::TcpListener;

    /// In-process SSH server that answers every login after `delay`
    #[derive(Clone)]
    struct SlowAuthServer {
        delay: Duration,
        accept: bool,
    }

    #[async_trait]
    impl server::Handler for SlowAuthServer {
        type Error = russh::Error;

        async fn auth_publickey(
            &mut self,
            _user: &str,
            _key: &PublicKey,
        ) -> Result<Auth, Self::Error> {
            tokio::time::sleep(self.delay).await;
            if self.accept {
                Ok(Auth::Accept)
            } else {
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    /// Serve one SSH connection on a local port
    async fn serve_once(handler: SlowAuthServer) -> HostAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(server::Config {
            keys: vec![KeyPair::generate_ed25519().unwrap()],
            auth_rejection_time: Duration::ZERO,
            ..Default::default()
        });
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            if let Ok(session) = server::run_stream(config, stream, handler).await {
                let _ = session.await;
            }
        });
        HostAddr::parse(&addr.to_string())
    }

    fn connector(timeout: Duration) -> SshConnector {
        let key = Arc::new(KeyPair::generate_ed25519().unwrap());
        SshConnector::new(Config::default(), "deploy", timeout, HostKeyPolicy::AcceptAny)
            .with_identities(vec![key])
    }

    #[tokio::test]
    async fn test_slow_authentication_is_not_timed_out() {
        let host = serve_once(SlowAuthServer {
            delay: Duration::from_millis(600),
            accept: true,
        })
        .await;

        let client = connector(Duration::from_millis(200)).connect(&host).await;
        let client = client.expect("only the handshake is time-bounded");
        client.close().await;
    }

    #[tokio::test]
    async fn test_rejected_keys_report_auth_failure() {
        let host = serve_once(SlowAuthServer {
            delay: Duration::ZERO,
            accept: false,
        })
        .await;

        let err = connector(Duration::from_secs(5))
            .connect(&host)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::AuthRejected { ref user, .. } if user == "deploy"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = HostAddr::parse(&listener.local_addr().unwrap().to_string());
        // Accept and never speak
        let held = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = connector(Duration::from_millis(100))
            .connect(&host)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Timeout { .. }));
        held.abort();
    }
}
