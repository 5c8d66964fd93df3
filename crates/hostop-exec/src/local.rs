//! Local command execution using `tokio::process`

use std::os::unix::fs::PermissionsExt;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::CommandOperator;

/// Local command operator
///
/// Executes commands and writes files on the local machine.
#[derive(Debug, Clone)]
pub struct LocalOperator;

impl LocalOperator {
    /// Create a new local operator
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandOperator for LocalOperator {
    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, command: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        // Use shell to support pipes, redirections, etc.
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(ExecError::transport)?;

        let duration = start.elapsed();
        let status = output.status.code().unwrap_or(-1);

        debug!(
            command = %command,
            status = status,
            duration = ?duration,
            "command completed"
        );

        Ok(CommandResult {
            status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        })
    }

    #[instrument(skip(self, src), level = "debug")]
    async fn upload(
        &self,
        src: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
        mode: u32,
    ) -> Result<(), ExecError> {
        let mut file = tokio::fs::File::create(remote_path)
            .await
            .map_err(|e| ExecError::Transport(format!("{remote_path}: {e}")))?;

        let written = tokio::io::copy(src, &mut file)
            .await
            .map_err(|e| ExecError::Transport(format!("{remote_path}: {e}")))?;

        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| ExecError::Transport(format!("{remote_path}: {e}")))?;

        debug!(path = %remote_path, bytes = written, mode = %format!("{mode:o}"), "file written");
        Ok(())
    }

    fn operator_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[tokio::test]
    async fn test_execute_success() {
        let operator = LocalOperator::new();
        let result = operator.execute("echo hello").await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout, b"hello\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let operator = LocalOperator::new();
        let result = operator.execute("echo oops >&2; exit 42").await.unwrap();

        assert!(!result.success());
        assert_eq!(result.status, 42);
        assert_eq!(result.stderr, b"oops\n");
    }

    #[tokio::test]
    async fn test_execute_keeps_binary_output() {
        let operator = LocalOperator::new();
        let result = operator.execute("printf '\\000\\377\\376'").await.unwrap();

        assert_eq!(result.stdout, vec![0x00, 0xff, 0xfe]);
    }

    #[tokio::test]
    async fn test_upload_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("payload.bin");
        let dest_str = dest.to_str().unwrap();

        let operator = LocalOperator::new();
        let mut src: &[u8] = &[1, 2, 3, 0xff];
        operator.upload(&mut src, dest_str, 0o640).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), vec![1, 2, 3, 0xff]);
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn test_upload_to_missing_directory_fails() {
        let operator = LocalOperator::new();
        let mut src: &[u8] = b"data";
        let err = operator
            .upload(&mut src, "/nonexistent/hostop/dir/file", 0o644)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Transport(_)));
    }

    #[tokio::test]
    async fn test_upload_file_missing_source() {
        let operator = LocalOperator::new();
        let err = operator
            .upload_file(Path::new("/nonexistent/hostop/script.sh"), "/tmp/unused", 0o755)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::FileAccess { .. }));
    }
}
