//! Secret vault: a namespaced store mapping an account identifier to a
//! secret string.
//!
//! Contract: `put` is upsert-with-overwrite, `get` fails with `NotFound`
//! when absent, `delete` is idempotent. Secrets never appear in logs,
//! activity entries, or control-plane responses.
//!
//! Two backends exist. The OS keyring backend is compiled in behind the
//! `native-keyring` cargo feature and probed at runtime; when it is
//! unavailable the vault falls back to an AES-256-CBC encrypted JSON file
//! whose key is derived via scrypt from a per-machine identifier and a
//! random salt stored next to the file.

pub mod encrypted;

#[cfg(feature = "native-keyring")]
pub mod native;

use crate::config::Config;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Which backend holds a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// The operating system keyring.
    NativeKeyring,
    /// The encrypted JSON file next to the daemon's other state.
    EncryptedFile,
}

impl StorageKind {
    /// Stable string form, used in metadata files.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::NativeKeyring => "native-keyring",
            StorageKind::EncryptedFile => "encrypted-file",
        }
    }
}

/// Secret vault handle. Backend selection happens once, at open.
pub enum Vault {
    /// OS keyring backend.
    #[cfg(feature = "native-keyring")]
    Native(native::NativeVault),
    /// Encrypted-file backend.
    Encrypted(encrypted::EncryptedVault),
}

impl Vault {
    /// Open the vault, preferring the native keyring when compiled in and
    /// functional, falling back to the encrypted file.
    pub fn open(config: &Config) -> Result<Self> {
        #[cfg(feature = "native-keyring")]
        {
            match native::NativeVault::probe() {
                Ok(vault) => {
                    tracing::debug!("using native keyring vault backend");
                    return Ok(Vault::Native(vault));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "native keyring unavailable, using encrypted file");
                }
            }
        }

        Ok(Vault::Encrypted(encrypted::EncryptedVault::open(config)?))
    }

    /// Which backend this vault writes to.
    pub fn kind(&self) -> StorageKind {
        match self {
            #[cfg(feature = "native-keyring")]
            Vault::Native(_) => StorageKind::NativeKeyring,
            Vault::Encrypted(_) => StorageKind::EncryptedFile,
        }
    }

    /// Store a secret, overwriting any previous value for the account.
    pub fn put(&self, account: &str, secret: &str) -> Result<StorageKind> {
        match self {
            #[cfg(feature = "native-keyring")]
            Vault::Native(v) => v.put(account, secret)?,
            Vault::Encrypted(v) => v.put(account, secret)?,
        }
        Ok(self.kind())
    }

    /// Retrieve a secret. Fails with `NotFound` when absent.
    pub fn get(&self, account: &str) -> Result<Zeroizing<String>> {
        match self {
            #[cfg(feature = "native-keyring")]
            Vault::Native(v) => v.get(account),
            Vault::Encrypted(v) => v.get(account),
        }
    }

    /// Remove a secret. Removing an absent account succeeds.
    pub fn delete(&self, account: &str) -> Result<()> {
        match self {
            #[cfg(feature = "native-keyring")]
            Vault::Native(v) => v.delete(account),
            Vault::Encrypted(v) => v.delete(account),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_strings() {
        assert_eq!(StorageKind::NativeKeyring.as_str(), "native-keyring");
        assert_eq!(StorageKind::EncryptedFile.as_str(), "encrypted-file");
    }

    #[test]
    fn test_open_falls_back_to_encrypted_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path());
        let vault = Vault::open(&config).expect("open");

        // Without a usable keyring the encrypted file backend is chosen.
        #[cfg(not(feature = "native-keyring"))]
        assert_eq!(vault.kind(), StorageKind::EncryptedFile);

        vault.put("acct", "s3cret").expect("put");
        assert_eq!(vault.get("acct").expect("get").as_str(), "s3cret");
    }
}
