//! hostop-exec: Local and remote execution abstraction
//!
//! Runs commands and uploads files either on the local machine or over SSH,
//! authenticating with a password, a private key (with agent and passphrase
//! fallbacks) or the ambient SSH agent.

pub mod agent;
pub mod auth;
pub mod error;
pub mod keys;
pub mod local;
pub mod operator;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::Credential;
pub use operator::{
    Remote, execute_local, execute_remote, execute_remote_with_password,
    execute_remote_with_private_key,
};
pub use result::{CommandResult, ConnectionInfo};
pub use traits::CommandOperator;
