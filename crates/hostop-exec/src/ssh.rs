//! SSH command execution using russh crate

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::PrivateKeyWithHashAlg;
use russh::{ChannelMsg, Disconnect, client};
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument};

use crate::agent::{KeyAgent, SshAgent};
use crate::auth::AuthMethod;
use crate::error::ExecError;
use crate::result::{CommandResult, ConnectionInfo};
use crate::traits::{CommandOperator, Connection, Connector};

/// SSH client handler for russh
#[derive(Debug)]
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not verified (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// Opens authenticated SSH sessions
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(client::Config::default())
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Agent = SshAgent;
    type Connection = SshOperator;

    #[instrument(skip(self, method), fields(address = %info.address(), auth = method.kind()))]
    async fn connect(
        &self,
        info: &ConnectionInfo,
        method: AuthMethod<SshAgent>,
    ) -> Result<SshOperator, ExecError> {
        let address = info.address();

        info!(
            host = %info.host,
            port = info.port,
            user = %info.user,
            "connecting to SSH"
        );

        let mut session = client::connect(
            self.config.clone(),
            (info.host.as_str(), info.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

        let outcome = match authenticate(&mut session, &info.user, method).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("no offered credential was accepted".to_string()),
            Err(message) => Err(message),
        };

        if let Err(message) = outcome {
            // The session is unusable; a failed goodbye changes nothing.
            let _ = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(ExecError::AuthenticationFailed { address, message });
        }

        info!(address = %address, "SSH connected and authenticated");

        Ok(SshOperator {
            handle: session,
            address,
        })
    }
}

/// Try `method` on a fresh session; `Ok(false)` means the server said no.
async fn authenticate(
    session: &mut client::Handle<SshClientHandler>,
    user: &str,
    method: AuthMethod<SshAgent>,
) -> Result<bool, String> {
    match method {
        AuthMethod::Password(password) => session
            .authenticate_password(user, password.as_str())
            .await
            .map(|res| res.success())
            .map_err(|e| e.to_string()),
        AuthMethod::PrivateKey(key) => {
            let hash_alg = best_rsa_hash(session).await;
            session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await
                .map(|res| res.success())
                .map_err(|e| e.to_string())
        }
        AuthMethod::Agent {
            mut agent,
            identity,
        } => {
            let identities = match identity {
                Some(key) => vec![key],
                None => agent.identities().await.map_err(|e| e.to_string())?,
            };
            if identities.is_empty() {
                return Err("SSH agent has no identities".to_string());
            }

            let hash_alg = best_rsa_hash(session).await;
            for key in identities {
                debug!(algorithm = %key.algorithm().as_str(), "offering agent identity");
                let res = session
                    .authenticate_publickey_with(user, key, hash_alg, &mut agent.client)
                    .await
                    .map_err(|e| e.to_string())?;
                if res.success() {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

async fn best_rsa_hash(
    session: &client::Handle<SshClientHandler>,
) -> Option<ssh_key::HashAlg> {
    session
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten()
}

/// Operator bound to one authenticated SSH session
pub struct SshOperator {
    handle: client::Handle<SshClientHandler>,
    /// `host:port`, for logs and errors
    address: String,
}

impl std::fmt::Debug for SshOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshOperator")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl SshOperator {
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn open_exec(&self, command: &str) -> Result<russh::Channel<client::Msg>, ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(ExecError::transport)?;

        channel
            .exec(true, command)
            .await
            .map_err(ExecError::transport)?;

        Ok(channel)
    }
}

/// Drain a channel until the server closes it
async fn collect_output(channel: &mut russh::Channel<client::Msg>) -> (i32, Vec<u8>, Vec<u8>) {
    let mut status = -1;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    // ExitStatus may arrive after Eof, so wait for the close
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            // ext 1 is stderr
            ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => status = exit_status.cast_signed(),
            _ => {}
        }
    }

    (status, stdout, stderr)
}

#[async_trait]
impl CommandOperator for SshOperator {
    #[instrument(skip(self), fields(address = %self.address))]
    async fn execute(&self, command: &str) -> Result<CommandResult, ExecError> {
        debug!(command = %command, "executing remote command");

        let start = Instant::now();
        let mut channel = self.open_exec(command).await?;
        let (status, stdout, stderr) = collect_output(&mut channel).await;
        let duration = start.elapsed();

        debug!(
            command = %command,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    #[instrument(skip(self, src), fields(address = %self.address))]
    async fn upload(
        &self,
        src: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
        mode: u32,
    ) -> Result<(), ExecError> {
        let target = shell_quote(remote_path);
        let mut channel = self
            .open_exec(&format!("cat > {target} && chmod {mode:o} {target}"))
            .await?;

        let sent = async {
            channel.data(src).await?;
            channel.eof().await
        }
        .await;

        // Drain even when sending failed; stderr usually says why cat quit early
        let (status, _, stderr) = collect_output(&mut channel).await;
        if sent.is_err() || status != 0 {
            return Err(write_error(remote_path, status, &stderr, sent.err()));
        }

        debug!(path = %remote_path, mode = %format!("{mode:o}"), "remote file written");
        Ok(())
    }

    fn operator_type(&self) -> &'static str {
        "ssh"
    }
}

#[async_trait]
impl Connection for SshOperator {
    async fn close(&self) -> Result<(), ExecError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(ExecError::transport)?;
        info!(address = %self.address, "SSH disconnected");
        Ok(())
    }
}

fn write_error(
    remote_path: &str,
    status: i32,
    stderr: &[u8],
    send_error: Option<russh::Error>,
) -> ExecError {
    let stderr = String::from_utf8_lossy(stderr);
    let mut message = format!("unable to write {remote_path} (exit {status})");
    if let Some(e) = send_error {
        message.push_str(&format!(", send failed: {e}"));
    }
    if !stderr.trim().is_empty() {
        message.push_str(&format!(": {}", stderr.trim()));
    }
    ExecError::Transport(message)
}

/// Single-quote `value` for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
