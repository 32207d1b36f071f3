//! Dialing the agent socket

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pssh_core::config::BackoffConfig;
use russh_keys::agent::client::AgentClient;
use tokio::net::UnixStream;

use crate::backoff::ExponentialBackoff;
use crate::connection::AgentConnection;
use crate::error::AgentError;

/// Opens new agent connections for the pool
#[async_trait]
pub trait AgentDialer: Send + Sync + 'static {
    /// Connection type produced by this dialer
    type Conn: AgentConnection;

    /// Open one new connection
    async fn dial(&self) -> Result<Self::Conn, AgentError>;
}

/// Dials the agent's Unix socket, retrying transient failures
#[derive(Debug, Clone)]
pub struct UnixSocketDialer {
    path: PathBuf,
    backoff: BackoffConfig,
}

impl UnixSocketDialer {
    /// Create a dialer for the socket at `path`
    pub fn new(path: impl Into<PathBuf>, backoff: BackoffConfig) -> Self {
        Self {
            path: path.into(),
            backoff,
        }
    }

}

#[async_trait]
impl AgentDialer for UnixSocketDialer {
    type Conn = AgentClient<UnixStream>;

    async fn dial(&self) -> Result<Self::Conn, AgentError> {
        let backoff = ExponentialBackoff::from_config(&self.backoff);
        let stream =
            dial_with_backoff(&self.path, backoff, || UnixStream::connect(&self.path)).await?;
        tracing::debug!("Opened agent connection on {:?}", self.path);
        Ok(AgentClient::connect(stream))
    }
}

/// Whether a dial error is worth retrying
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => true,
        // Out of descriptors, system-wide or per process
        _ => matches!(err.raw_os_error(), Some(libc::ENFILE) | Some(libc::EMFILE)),
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the backoff
/// budget runs out.
pub async fn dial_with_backoff<T, F, Fut>(
    path: &Path,
    mut backoff: ExponentialBackoff,
    mut attempt: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match attempt().await {
            Ok(conn) => return Ok(conn),
            Err(e) if is_transient(&e) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!("Agent dial failed: {}. Retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!("Giving up on agent socket {:?}: {}", path, e);
                    return Err(AgentError::Dial {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            },
            Err(e) => {
                return Err(AgentError::Dial {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn quick_backoff(budget: Duration) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
            0.0,
            budget,
        )
    }

    #[test]
    fn test_transient_kinds() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let attempts = AtomicUsize::new(0);
        let backoff = quick_backoff(Duration::from_secs(10));
        let result = dial_with_backoff(Path::new("/tmp/agent"), backoff, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(io::Error::from(io::ErrorKind::ConnectionReset))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let backoff = quick_backoff(Duration::from_secs(10));
        let result: Result<(), _> = dial_with_backoff(Path::new("/tmp/agent"), backoff, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::from(io::ErrorKind::NotFound)) }
        })
        .await;

        assert!(matches!(result, Err(AgentError::Dial { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_budget_spent() {
        let attempts = AtomicUsize::new(0);
        let backoff = quick_backoff(Duration::from_millis(50));
        let result: Result<(), _> = dial_with_backoff(Path::new("/tmp/agent"), backoff, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::from(io::ErrorKind::TimedOut)) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("dial agent socket /tmp/agent"));
        // 10 + 20 + 20 (trimmed) then the budget is gone
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_missing_socket_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let dialer = UnixSocketDialer::new(socket, BackoffConfig::default());
        let err = dialer.dial().await.err().expect("dial should fail");
        assert!(matches!(err, AgentError::Dial { .. }));
    }
}
