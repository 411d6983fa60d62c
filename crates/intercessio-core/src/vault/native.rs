//! OS keyring vault backend.
//!
//! Compiled in behind the `native-keyring` cargo feature. The backend is
//! probed with a write/read round-trip at open; a platform without a
//! usable keyring falls back to the encrypted-file backend.

use crate::error::{Error, Result};
use keyring::Entry;
use zeroize::Zeroizing;

/// Keyring service name all entries live under.
const SERVICE: &str = "intercessio";

/// Account used only for the availability probe.
const PROBE_ACCOUNT: &str = "__probe__";

/// Vault backend storing secrets in the operating system keyring.
pub struct NativeVault(());

impl NativeVault {
    /// Check that the platform keyring actually works before committing
    /// to it.
    pub fn probe() -> Result<Self> {
        let entry = entry(PROBE_ACCOUNT)?;
        entry
            .set_password("ok")
            .map_err(|e| Error::Vault(format!("keyring probe write failed: {}", e)))?;
        let read = entry
            .get_password()
            .map_err(|e| Error::Vault(format!("keyring probe read failed: {}", e)))?;
        let _ = entry.delete_credential();

        if read != "ok" {
            return Err(Error::Vault("keyring probe round-trip mismatch".into()));
        }
        Ok(Self(()))
    }

    /// Store a secret, overwriting any previous value.
    pub fn put(&self, account: &str, secret: &str) -> Result<()> {
        entry(account)?
            .set_password(secret)
            .map_err(|e| Error::Vault(format!("keyring write failed: {}", e)))
    }

    /// Retrieve a secret.
    pub fn get(&self, account: &str) -> Result<Zeroizing<String>> {
        match entry(account)?.get_password() {
            Ok(secret) => Ok(Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => {
                Err(Error::NotFound(format!("vault account '{}'", account)))
            }
            Err(e) => Err(Error::Vault(format!("keyring read failed: {}", e))),
        }
    }

    /// Remove a secret. Absent accounts are fine.
    pub fn delete(&self, account: &str) -> Result<()> {
        match entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Vault(format!("keyring delete failed: {}", e))),
        }
    }
}

fn entry(account: &str) -> Result<Entry> {
    Entry::new(SERVICE, account).map_err(|e| Error::Vault(format!("keyring entry failed: {}", e)))
}
