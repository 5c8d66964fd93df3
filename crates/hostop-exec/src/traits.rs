//! Operator capability traits

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::agent::KeyAgent;
use crate::auth::AuthMethod;
use crate::error::ExecError;
use crate::keys::expand_path;
use crate::result::{CommandResult, ConnectionInfo};

/// Capability set shared by every execution backend
#[async_trait]
pub trait CommandOperator: Send + Sync {
    /// Run `command` through a shell and capture its output.
    ///
    /// A non-zero exit status is reported in the result, not as an error.
    async fn execute(&self, command: &str) -> Result<CommandResult, ExecError>;

    /// Write everything read from `src` to `remote_path` with permission bits `mode`.
    async fn upload(
        &self,
        src: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
        mode: u32,
    ) -> Result<(), ExecError>;

    /// Upload the local file at `path`.
    async fn upload_file(&self, path: &Path, remote_path: &str, mode: u32) -> Result<(), ExecError> {
        let path = expand_path(path);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ExecError::file_access(path.display(), e))?;
        self.upload(&mut file, remote_path, mode).await
    }

    fn operator_type(&self) -> &'static str;
}

/// An open, authenticated session that can be torn down
#[async_trait]
pub trait Connection: CommandOperator {
    async fn close(&self) -> Result<(), ExecError>;
}

/// Opens a [`Connection`] from a resolved [`AuthMethod`]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Agent client type carried by agent-based auth methods
    type Agent: KeyAgent;
    type Connection: Connection;

    async fn connect(
        &self,
        info: &ConnectionInfo,
        method: AuthMethod<Self::Agent>,
    ) -> Result<Self::Connection, ExecError>;
}
