//! Error types for hostop-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while authenticating, connecting or executing
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// A key, public key or upload source could not be read
    #[error("unable to read {path}: {message}")]
    FileAccess {
        /// Path that was being read
        path: String,
        /// Underlying I/O error
        message: String,
    },

    /// A private key was malformed or the passphrase was wrong
    #[error("unable to parse private key {path}: {message}")]
    KeyParse {
        /// Path of the key file
        path: String,
        /// Parser error
        message: String,
    },

    /// The ambient SSH agent could not be reached
    #[error("unable to reach SSH agent: {0}")]
    AgentUnreachable(String),

    /// Failed to dial or handshake with the remote host
    #[error("unable to connect to {address} over ssh: {message}")]
    ConnectionFailed {
        /// `host:port` of the target
        address: String,
        /// Underlying error
        message: String,
    },

    /// The server rejected every offered credential
    #[error("authentication to {address} failed: {message}")]
    AuthenticationFailed {
        /// `host:port` of the target
        address: String,
        /// Reason reported by the client library
        message: String,
    },

    /// Channel or I/O failure while executing or uploading
    #[error("transport error: {0}")]
    Transport(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// Deadline imposed by the caller was exceeded
    #[error("operation timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    pub(crate) fn file_access(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        ExecError::FileAccess {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        ExecError::Transport(err.to_string())
    }
}
