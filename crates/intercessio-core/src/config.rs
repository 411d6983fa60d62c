//! Daemon configuration: filesystem layout and environment knobs.
//!
//! All durable state lives under a single configuration directory
//! (default `~/.intercessio`). The directory is created on first use with
//! owner-only permissions.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration directory (tilde-expanded by the CLI).
pub const DEFAULT_CONFIG_DIR: &str = "~/.intercessio";

/// Control socket filename.
pub const SOCKET_FILE: &str = "intercessio.sock";

/// Session store database filename.
pub const DB_FILE: &str = "intercessio.db";

/// Key metadata list filename.
pub const KEYS_FILE: &str = "keys.json";

/// Active-key pointer filename.
pub const STATE_FILE: &str = "state.json";

/// Encrypted secret vault filename (encrypted-file backend).
pub const SECRETS_FILE: &str = "secrets.json";

/// Vault key-derivation salt filename (encrypted-file backend).
pub const SALT_FILE: &str = "salt";

/// Environment variable overriding the pending-approval TTL, in seconds.
pub const APPROVAL_TTL_ENV: &str = "INTERCESSIO_APPROVAL_TTL_SECS";

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    dir: PathBuf,
}

impl Config {
    /// Create a configuration rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The configuration directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the configuration directory if missing, with owner-only
    /// permissions on Unix.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Metadata(format!("failed to create config dir: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&self.dir, perms)
                .map_err(|e| Error::Metadata(format!("failed to set dir permissions: {}", e)))?;
        }

        Ok(())
    }

    /// Path of the control socket.
    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(SOCKET_FILE)
    }

    /// Path of the session store database.
    pub fn db_path(&self) -> PathBuf {
        self.dir.join(DB_FILE)
    }

    /// Path of the key metadata list.
    pub fn keys_path(&self) -> PathBuf {
        self.dir.join(KEYS_FILE)
    }

    /// Path of the active-key pointer.
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Path of the encrypted vault file.
    pub fn secrets_path(&self) -> PathBuf {
        self.dir.join(SECRETS_FILE)
    }

    /// Path of the vault salt file.
    pub fn salt_path(&self) -> PathBuf {
        self.dir.join(SALT_FILE)
    }

    /// Time-to-live for pending approvals.
    ///
    /// Defaults to ten minutes; overridable via `INTERCESSIO_APPROVAL_TTL_SECS`.
    pub fn approval_ttl(&self) -> Duration {
        let secs = std::env::var(APPROVAL_TTL_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(crate::DEFAULT_APPROVAL_TTL_SECS);
        Duration::from_secs(secs)
    }
}

/// Write a file atomically: write to a sibling temp file, then rename
/// over the destination.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| Error::Metadata(format!("failed to write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| Error::Metadata(format!("failed to rename {}: {}", tmp.display(), e)))?;
    Ok(())
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_rooted() {
        let config = Config::new("/tmp/ic-test");
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/ic-test/intercessio.sock"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/ic-test/intercessio.db"));
        assert_eq!(config.keys_path(), PathBuf::from("/tmp/ic-test/keys.json"));
        assert_eq!(config.salt_path(), PathBuf::from("/tmp/ic-test/salt"));
    }

    #[test]
    fn test_default_approval_ttl() {
        let config = Config::new("/tmp/ic-test");
        assert_eq!(config.approval_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"first").expect("write");
        write_atomic(&path, b"second").expect("rewrite");

        let content = std::fs::read(&path).expect("read");
        assert_eq!(content, b"second");
        assert!(!path.with_extension("tmp").exists());
    }
}
