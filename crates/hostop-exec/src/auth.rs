//! Authentication method resolution
//!
//! Turns a [`Credential`] into an [`AuthMethod`] ready for the handshake.
//! Private keys go through three stages, stopping at the first that yields
//! a method:
//!
//! 1. parse the key without a passphrase,
//! 2. if it is passphrase protected, look for its public half in the agent,
//! 3. otherwise ask for the passphrase on the terminal.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use russh::keys::ssh_key::{PrivateKey, PublicKey};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::agent::{AgentConnector, AgentSocket, KeyAgent};
use crate::error::ExecError;
use crate::keys::{Credential, expand_path, public_key_path, warn_if_exposed};

/// Resolved credential for one connection attempt
///
/// Consumed by the connector; never stored.
pub enum AuthMethod<A> {
    /// Present this password
    Password(Zeroizing<String>),
    /// Sign challenges with this decrypted key
    PrivateKey(Arc<PrivateKey>),
    /// Let the agent sign
    Agent {
        agent: A,
        /// Restrict signing to this identity; `None` offers every identity
        identity: Option<PublicKey>,
    },
}

impl<A> AuthMethod<A> {
    pub fn password(password: impl Into<String>) -> Self {
        AuthMethod::Password(Zeroizing::new(password.into()))
    }

    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PrivateKey(_) => "private-key",
            AuthMethod::Agent { .. } => "agent",
        }
    }
}

impl<A> fmt::Debug for AuthMethod<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::PrivateKey(key) => f
                .debug_tuple("PrivateKey")
                .field(&key.algorithm().as_str())
                .finish(),
            AuthMethod::Agent { identity, .. } => f
                .debug_struct("Agent")
                .field("identity", &identity.as_ref().map(PublicKey::algorithm))
                .finish_non_exhaustive(),
        }
    }
}

/// Source of passphrases for encrypted keys
///
/// Called from a blocking thread, so implementations may block on input.
pub trait PassphrasePrompt: Send + Sync + 'static {
    fn passphrase(&self, key_path: &Path) -> Result<Zeroizing<String>, ExecError>;
}

/// Asks on the controlling terminal with echo disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn passphrase(&self, key_path: &Path) -> Result<Zeroizing<String>, ExecError> {
        let mut stdout = std::io::stdout();
        write!(stdout, "Enter passphrase for '{}': ", key_path.display())
            .and_then(|()| stdout.flush())
            .map_err(ExecError::transport)?;

        let passphrase = rpassword::read_password()
            .map(Zeroizing::new)
            .map_err(|e| ExecError::file_access("terminal", e))?;

        // read_password swallows the newline; keep later output on its own line
        let _ = writeln!(stdout);
        Ok(passphrase)
    }
}

/// Produces [`AuthMethod`]s from credentials
#[derive(Debug, Clone)]
pub struct AuthResolver<A = AgentSocket, P = TerminalPrompt> {
    agents: A,
    prompt: Arc<P>,
}

impl AuthResolver {
    /// Resolver using `SSH_AUTH_SOCK` and the terminal
    pub fn from_env() -> Self {
        Self::new(AgentSocket::from_env(), TerminalPrompt)
    }
}

impl<A: AgentConnector, P: PassphrasePrompt> AuthResolver<A, P> {
    pub fn new(agents: A, prompt: P) -> Self {
        Self {
            agents,
            prompt: Arc::new(prompt),
        }
    }

    /// Dispatch on the selected credential
    ///
    /// # Errors
    /// See [`Self::private_key`] and [`Self::agent`].
    pub async fn resolve(&self, credential: &Credential) -> Result<AuthMethod<A::Agent>, ExecError> {
        match credential {
            Credential::Password { password } => Ok(AuthMethod::password(password.as_str())),
            Credential::PrivateKey { path } => self.private_key(path).await,
            Credential::Agent => self.agent().await,
        }
    }

    /// Load a private key, falling back to the agent and then a passphrase prompt
    ///
    /// # Errors
    /// - `FileAccess` if the key cannot be read
    /// - `KeyParse` if the key is malformed or the passphrase is wrong
    #[instrument(skip(self, path), fields(key = %path.display()))]
    pub async fn private_key(&self, path: &Path) -> Result<AuthMethod<A::Agent>, ExecError> {
        let key_path = expand_path(path);
        let pem = tokio::fs::read_to_string(&key_path)
            .await
            .map_err(|e| ExecError::file_access(key_path.display(), e))?;
        warn_if_exposed(&key_path).await;

        if let Some(key) = parse_unencrypted(&pem, &key_path)? {
            debug!("using unencrypted private key");
            return Ok(AuthMethod::PrivateKey(Arc::new(key)));
        }

        if let Some(method) = self.agent_for_key(&public_key_path(&key_path)).await {
            debug!("passphrase-protected key is loaded in the agent");
            return Ok(method);
        }

        let passphrase = self.ask_passphrase(&key_path).await?;
        let key = russh::keys::decode_secret_key(&pem, Some(passphrase.as_str())).map_err(|e| {
            ExecError::KeyParse {
                path: key_path.display().to_string(),
                message: format!("with passphrase: {e}"),
            }
        })?;

        Ok(AuthMethod::PrivateKey(Arc::new(key)))
    }

    /// Offer every identity held by the ambient agent
    ///
    /// # Errors
    /// `AgentUnreachable` if no agent answers; there is no fallback.
    #[instrument(skip(self))]
    pub async fn agent(&self) -> Result<AuthMethod<A::Agent>, ExecError> {
        let agent = self.agents.connect().await?;
        Ok(AuthMethod::Agent {
            agent,
            identity: None,
        })
    }

    async fn ask_passphrase(&self, key_path: &Path) -> Result<Zeroizing<String>, ExecError> {
        let prompt = Arc::clone(&self.prompt);
        let key_path = key_path.to_path_buf();
        tokio::task::spawn_blocking(move || prompt.passphrase(&key_path))
            .await
            .map_err(ExecError::transport)?
    }

    /// Agent method restricted to the identity matching `public_key`.
    ///
    /// Any failure counts as no match. The probe connection is dropped
    /// unless it is handed back inside the method.
    async fn agent_for_key(&self, public_key: &Path) -> Option<AuthMethod<A::Agent>> {
        match self.probe_agent(public_key).await {
            Ok(Some(method)) => Some(method),
            Ok(None) => {
                debug!(public_key = %public_key.display(), "no agent identity matches key");
                None
            }
            Err(e) => {
                debug!(error = %e, "agent probe failed, falling back to passphrase");
                None
            }
        }
    }

    async fn probe_agent(&self, public_key: &Path) -> Result<Option<AuthMethod<A::Agent>>, ExecError> {
        let mut agent = self.agents.connect().await?;

        let identities = agent.identities().await?;
        if identities.is_empty() {
            return Ok(None);
        }

        let text = tokio::fs::read_to_string(public_key)
            .await
            .map_err(|e| ExecError::file_access(public_key.display(), e))?;
        let expected = PublicKey::from_openssh(text.trim()).map_err(|e| ExecError::KeyParse {
            path: public_key.display().to_string(),
            message: e.to_string(),
        })?;
        let expected_blob = key_blob(&expected)?;

        let Some(identity) = find_identity(identities, &expected_blob, key_blob) else {
            return Ok(None);
        };
        Ok(Some(AuthMethod::Agent {
            agent,
            identity: Some(identity),
        }))
    }
}

/// First identity whose encoding equals `expected`; identities that fail to
/// encode are skipped.
fn find_identity(
    identities: Vec<PublicKey>,
    expected: &[u8],
    encode: impl Fn(&PublicKey) -> Result<Vec<u8>, ExecError>,
) -> Option<PublicKey> {
    identities.into_iter().find(|identity| match encode(identity) {
        Ok(blob) => blob == expected,
        Err(e) => {
            debug!(error = %e, "skipping agent identity that cannot be encoded");
            false
        }
    })
}

/// `Ok(None)` when the key needs a passphrase; any other failure is fatal.
fn parse_unencrypted(pem: &str, path: &Path) -> Result<Option<PrivateKey>, ExecError> {
    match russh::keys::decode_secret_key(pem, None) {
        Ok(key) => Ok(Some(key)),
        Err(russh::keys::Error::KeyIsEncrypted) => Ok(None),
        Err(e) => Err(ExecError::KeyParse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}

/// Wire encoding of a public key, as agents report it
fn key_blob(key: &PublicKey) -> Result<Vec<u8>, ExecError> {
    key.to_bytes().map_err(|e| ExecError::KeyParse {
        path: key.comment().to_string(),
        message: e.to_string(),
    })
}
