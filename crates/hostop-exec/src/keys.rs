//! Key file locations and credential selection

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a remote connection authenticates
///
/// Exactly one strategy is used per connection attempt.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credential {
    /// Present a password
    Password { password: String },
    /// Sign with a private key file, prompting for its passphrase when needed
    PrivateKey { path: PathBuf },
    /// Delegate signing to the agent named by `SSH_AUTH_SOCK`
    #[default]
    Agent,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey { path } => {
                f.debug_tuple("PrivateKey").field(&path.display()).finish()
            }
            Credential::Agent => f.write_str("Agent"),
        }
    }
}

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without the shorthand, and every path when no home directory
/// is known, are returned unchanged.
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match dirs::home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Companion public key of a private key file (`<key>.pub`)
#[must_use]
pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut name = OsString::from(private_key.as_os_str());
    name.push(".pub");
    PathBuf::from(name)
}

/// Log when a private key is readable by group or others.
///
/// Returns whether the warning fired; unreadable metadata counts as not exposed.
pub(crate) async fn warn_if_exposed(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };

    // mode & 0o77 checks group and other permissions
    let exposed = metadata.permissions().mode() & 0o77 != 0;
    if exposed {
        warn!(path = %path.display(), "private key permissions too open (should be 600)");
    }
    exposed
}
