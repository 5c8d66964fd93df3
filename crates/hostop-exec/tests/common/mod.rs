#![allow(dead_code)]

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::ssh_key::PublicKey;
use tokio::io::{AsyncRead, AsyncReadExt};
use zeroize::Zeroizing;

use hostop_exec::agent::{AgentConnector, KeyAgent};
use hostop_exec::auth::{AuthMethod, PassphrasePrompt};
use hostop_exec::error::ExecError;
use hostop_exec::result::{CommandResult, ConnectionInfo};
use hostop_exec::traits::{CommandOperator, Connection, Connector};

pub const PASSPHRASE: &str = "correct horse";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn public_key(name: &str) -> PublicKey {
    let text = std::fs::read_to_string(fixture(name)).unwrap();
    PublicKey::from_openssh(text.trim()).unwrap()
}

// Agents

pub struct FakeAgent {
    keys: Vec<PublicKey>,
    drops: Arc<AtomicUsize>,
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyAgent for FakeAgent {
    async fn identities(&mut self) -> Result<Vec<PublicKey>, ExecError> {
        Ok(self.keys.clone())
    }
}

/// Agent connector; `None` keys means no agent is running
#[derive(Clone, Default)]
pub struct FakeAgents {
    keys: Option<Vec<PublicKey>>,
    pub connects: Arc<AtomicUsize>,
    pub drops: Arc<AtomicUsize>,
}

impl FakeAgents {
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn holding(keys: Vec<PublicKey>) -> Self {
        Self {
            keys: Some(keys),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentConnector for FakeAgents {
    type Agent = FakeAgent;

    async fn connect(&self) -> Result<FakeAgent, ExecError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.keys {
            Some(keys) => Ok(FakeAgent {
                keys: keys.clone(),
                drops: self.drops.clone(),
            }),
            None => Err(ExecError::AgentUnreachable("SSH_AUTH_SOCK is not set".to_string())),
        }
    }
}

// Prompt

#[derive(Clone)]
pub struct CountingPrompt {
    answer: String,
    calls: Arc<AtomicUsize>,
}

impl CountingPrompt {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PassphrasePrompt for CountingPrompt {
    fn passphrase(&self, _key_path: &Path) -> Result<Zeroizing<String>, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Zeroizing::new(self.answer.clone()))
    }
}

// Connections

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Connector that records every call instead of dialing
pub struct FakeConnector<G = FakeAgent> {
    pub journal: Journal,
    pub closes: Arc<AtomicUsize>,
    refuse: bool,
    failing_command: Option<String>,
    failing_close: bool,
    _agent: PhantomData<fn() -> G>,
}

impl<G> FakeConnector<G> {
    pub fn new() -> Self {
        Self {
            journal: Journal::default(),
            closes: Arc::default(),
            refuse: false,
            failing_command: None,
            failing_close: false,
            _agent: PhantomData,
        }
    }

    /// Every dial fails as if the port were closed
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    /// Executing `command` fails with a transport error
    pub fn failing_on(command: &str) -> Self {
        Self {
            failing_command: Some(command.to_string()),
            ..Self::new()
        }
    }

    /// Closing the connection fails after it is counted
    pub fn failing_close() -> Self {
        Self {
            failing_close: true,
            ..Self::new()
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<G: KeyAgent> Connector for FakeConnector<G> {
    type Agent = G;
    type Connection = FakeConnection;

    async fn connect(
        &self,
        info: &ConnectionInfo,
        method: AuthMethod<G>,
    ) -> Result<FakeConnection, ExecError> {
        self.journal
            .push(format!("connect {} {}", info.address(), method.kind()));

        if self.refuse {
            return Err(ExecError::ConnectionFailed {
                address: info.address(),
                message: "connection refused".to_string(),
            });
        }

        Ok(FakeConnection {
            journal: self.journal.clone(),
            closes: self.closes.clone(),
            failing_command: self.failing_command.clone(),
            failing_close: self.failing_close,
        })
    }
}

pub struct FakeConnection {
    journal: Journal,
    closes: Arc<AtomicUsize>,
    failing_command: Option<String>,
    failing_close: bool,
}

pub fn transport_failure(command: &str) -> ExecError {
    ExecError::Transport(format!("channel closed while running {command}"))
}

#[async_trait]
impl CommandOperator for FakeConnection {
    async fn execute(&self, command: &str) -> Result<CommandResult, ExecError> {
        self.journal.push(format!("execute {command}"));

        if self.failing_command.as_deref() == Some(command) {
            return Err(transport_failure(command));
        }

        Ok(CommandResult {
            status: 0,
            stdout: b"ok\n".to_vec(),
            stderr: Vec::new(),
            duration: Duration::from_millis(1),
        })
    }

    async fn upload(
        &self,
        src: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
        mode: u32,
    ) -> Result<(), ExecError> {
        let mut buffer = Vec::new();
        src.read_to_end(&mut buffer)
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;

        self.journal
            .push(format!("upload {remote_path} {mode:o} {}", buffer.len()));
        Ok(())
    }

    fn operator_type(&self) -> &'static str {
        "fake"
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn close(&self) -> Result<(), ExecError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.journal.push("close".to_string());

        if self.failing_close {
            return Err(ExecError::Transport("disconnect: broken pipe".to_string()));
        }
        Ok(())
    }
}
