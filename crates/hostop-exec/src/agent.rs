//! SSH agent access

use std::path::PathBuf;

use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key::PublicKey;
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::ExecError;

/// Environment variable naming the agent's Unix socket
pub const AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";

/// A connected key agent
///
/// Dropping the value closes the agent connection.
#[async_trait]
pub trait KeyAgent: Send + 'static {
    /// Public keys of every identity loaded in the agent
    async fn identities(&mut self) -> Result<Vec<PublicKey>, ExecError>;
}

/// Opens connections to a key agent
#[async_trait]
pub trait AgentConnector: Send + Sync {
    type Agent: KeyAgent;

    /// Fails with [`ExecError::AgentUnreachable`] when no agent answers.
    async fn connect(&self) -> Result<Self::Agent, ExecError>;
}

/// Live connection to an OpenSSH-compatible agent
pub struct SshAgent {
    pub(crate) client: AgentClient<UnixStream>,
}

impl std::fmt::Debug for SshAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshAgent").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyAgent for SshAgent {
    async fn identities(&mut self) -> Result<Vec<PublicKey>, ExecError> {
        self.client
            .request_identities()
            .await
            .map_err(|e| ExecError::AgentUnreachable(format!("listing identities: {e}")))
    }
}

/// Location of the agent socket
#[derive(Debug, Clone, Default)]
pub struct AgentSocket {
    path: Option<PathBuf>,
}

impl AgentSocket {
    /// Use an explicit socket path, or none at all
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Read the socket path from `SSH_AUTH_SOCK`
    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os(AUTH_SOCK_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        )
    }
}

#[async_trait]
impl AgentConnector for AgentSocket {
    type Agent = SshAgent;

    async fn connect(&self) -> Result<SshAgent, ExecError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| ExecError::AgentUnreachable(format!("{AUTH_SOCK_ENV} is not set")))?;

        debug!(socket = %path.display(), "connecting to SSH agent");

        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ExecError::AgentUnreachable(format!("{}: {e}", path.display())))?;

        Ok(SshAgent {
            client: AgentClient::connect(stream),
        })
    }
}
