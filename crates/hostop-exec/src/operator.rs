//! Callback-style entry points
//!
//! Each function hands an operator to the caller's async closure. Remote
//! variants authenticate, connect, run the closure and then close the
//! connection on every exit path; the closure's own result is what gets
//! returned.

use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::agent::{AgentConnector, AgentSocket};
use crate::auth::{AuthMethod, AuthResolver, PassphrasePrompt, TerminalPrompt};
use crate::error::ExecError;
use crate::keys::Credential;
use crate::local::LocalOperator;
use crate::result::ConnectionInfo;
use crate::ssh::SshConnector;
use crate::traits::{CommandOperator, Connection, Connector};

/// Run `callback` against the local machine.
///
/// # Errors
/// Whatever the callback returns.
pub async fn execute_local<T, E, F>(callback: F) -> Result<T, E>
where
    F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
{
    let operator = LocalOperator::new();
    let operator: &dyn CommandOperator = &operator;
    callback(operator).await
}

/// Run `callback` on `info` after password authentication.
///
/// # Errors
/// Connection errors, or whatever the callback returns.
pub async fn execute_remote_with_password<T, E, F>(
    info: &ConnectionInfo,
    password: &str,
    callback: F,
) -> Result<T, E>
where
    F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
    E: From<ExecError>,
{
    Remote::new().with_password(info, password, callback).await
}

/// Run `callback` on `info` authenticating with the key at `private_key`.
///
/// Passphrase-protected keys are used through the agent when it holds them,
/// otherwise the passphrase is read from the terminal.
///
/// # Errors
/// Key, connection errors, or whatever the callback returns.
pub async fn execute_remote_with_private_key<T, E, F>(
    info: &ConnectionInfo,
    private_key: &Path,
    callback: F,
) -> Result<T, E>
where
    F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
    E: From<ExecError>,
{
    Remote::new()
        .with_private_key(info, private_key, callback)
        .await
}

/// Run `callback` on `info` with every identity of the ambient agent.
///
/// # Errors
/// `AgentUnreachable` before any dial, connection errors, or whatever the
/// callback returns.
pub async fn execute_remote<T, E, F>(info: &ConnectionInfo, callback: F) -> Result<T, E>
where
    F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
    E: From<ExecError>,
{
    Remote::new().with_agent(info, callback).await
}

/// Remote orchestration with pluggable connector, agent and prompt
#[derive(Debug, Clone)]
pub struct Remote<C = SshConnector, A = AgentSocket, P = TerminalPrompt> {
    connector: C,
    resolver: AuthResolver<A, P>,
}

impl Remote {
    /// SSH over TCP, agent from `SSH_AUTH_SOCK`, passphrases from the terminal
    #[must_use]
    pub fn new() -> Self {
        Self {
            connector: SshConnector::default(),
            resolver: AuthResolver::from_env(),
        }
    }
}

impl Default for Remote {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, A, P> Remote<C, A, P>
where
    C: Connector,
    A: AgentConnector<Agent = C::Agent>,
    P: PassphrasePrompt,
{
    pub fn with_parts(connector: C, agents: A, prompt: P) -> Self {
        Self {
            connector,
            resolver: AuthResolver::new(agents, prompt),
        }
    }

    /// # Errors
    /// See [`execute_remote_with_password`].
    pub async fn with_password<T, E, F>(
        &self,
        info: &ConnectionInfo,
        password: &str,
        callback: F,
    ) -> Result<T, E>
    where
        F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
        E: From<ExecError>,
    {
        self.run(info, AuthMethod::password(password), callback).await
    }

    /// # Errors
    /// See [`execute_remote_with_private_key`].
    pub async fn with_private_key<T, E, F>(
        &self,
        info: &ConnectionInfo,
        private_key: &Path,
        callback: F,
    ) -> Result<T, E>
    where
        F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
        E: From<ExecError>,
    {
        let method = self.resolver.private_key(private_key).await?;
        self.run(info, method, callback).await
    }

    /// # Errors
    /// See [`execute_remote`].
    pub async fn with_agent<T, E, F>(&self, info: &ConnectionInfo, callback: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
        E: From<ExecError>,
    {
        let method = self.resolver.agent().await?;
        self.run(info, method, callback).await
    }

    /// Resolve `credential` and run `callback` over the resulting connection.
    ///
    /// # Errors
    /// Resolution, connection errors, or whatever the callback returns.
    pub async fn with_credential<T, E, F>(
        &self,
        info: &ConnectionInfo,
        credential: &Credential,
        callback: F,
    ) -> Result<T, E>
    where
        F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
        E: From<ExecError>,
    {
        let method = self.resolver.resolve(credential).await?;
        self.run(info, method, callback).await
    }

    #[instrument(skip_all, fields(address = %info.address(), auth = method.kind()))]
    async fn run<T, E, F>(
        &self,
        info: &ConnectionInfo,
        method: AuthMethod<C::Agent>,
        callback: F,
    ) -> Result<T, E>
    where
        F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, E>,
        E: From<ExecError>,
    {
        let connection = self.connector.connect(info, method).await?;
        debug!(operator = connection.operator_type(), "running callback");

        let operator: &dyn CommandOperator = &connection;
        let result = callback(operator).await;

        // Best effort: the callback's outcome wins over a failed close
        if let Err(e) = connection.close().await {
            warn!(error = %e, "failed to close connection");
        }

        result
    }
}
