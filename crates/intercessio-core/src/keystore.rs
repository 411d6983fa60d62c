//! Key metadata store.
//!
//! Two JSON documents under the config directory: `keys.json` (the key
//! list) and `state.json` (the active-key pointer). Key material itself
//! lives in the secret vault; this store only holds metadata. Reads of a
//! missing file return empty state; writes are atomic.

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::vault::StorageKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata of one signing key. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    /// Opaque short identifier, unique across the list.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Bech32-encoded public key, derived from the secret.
    pub npub: String,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Vault account holding the secret; one entry per account.
    pub vault_account: String,
    /// Backend the secret was written to.
    pub storage_kind: StorageKind,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActivePointer {
    active: Option<String>,
}

/// Durable key metadata and active-key pointer.
pub struct MetadataStore {
    keys_path: PathBuf,
    state_path: PathBuf,
}

impl MetadataStore {
    /// Open the store under the given configuration directory.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_dir()?;
        Ok(Self {
            keys_path: config.keys_path(),
            state_path: config.state_path(),
        })
    }

    /// All known keys.
    pub fn list_keys(&self) -> Result<Vec<KeyMetadata>> {
        match std::fs::read(&self.keys_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Metadata(format!("corrupt key list: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Metadata(format!("failed to read key list: {}", e))),
        }
    }

    /// Look up a key by id.
    pub fn get_key(&self, id: &str) -> Result<Option<KeyMetadata>> {
        Ok(self.list_keys()?.into_iter().find(|k| k.id == id))
    }

    /// Append a new key. Duplicate ids or vault accounts are rejected.
    pub fn add_key(&self, meta: KeyMetadata) -> Result<()> {
        let mut keys = self.list_keys()?;
        if keys.iter().any(|k| k.id == meta.id) {
            return Err(Error::Metadata(format!("duplicate key id '{}'", meta.id)));
        }
        if keys.iter().any(|k| k.vault_account == meta.vault_account) {
            return Err(Error::Metadata(format!(
                "duplicate vault account '{}'",
                meta.vault_account
            )));
        }
        keys.push(meta);
        self.write_keys(&keys)
    }

    /// Remove a key by id. Returns the removed metadata so the caller can
    /// also drop the vault entry. When the removed key was active, the
    /// pointer moves to the first remaining key, or clears when none are
    /// left.
    pub fn remove_key(&self, id: &str) -> Result<Option<KeyMetadata>> {
        let mut keys = self.list_keys()?;
        let Some(pos) = keys.iter().position(|k| k.id == id) else {
            return Ok(None);
        };
        let removed = keys.remove(pos);
        self.write_keys(&keys)?;

        if self.active_key()?.as_deref() == Some(id) {
            self.set_active(keys.first().map(|k| k.id.clone()))?;
        }
        Ok(Some(removed))
    }

    /// Id of the key new sessions use, when any.
    pub fn active_key(&self) -> Result<Option<String>> {
        match std::fs::read(&self.state_path) {
            Ok(bytes) => {
                let pointer: ActivePointer = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Metadata(format!("corrupt state file: {}", e)))?;
                Ok(pointer.active)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Metadata(format!("failed to read state file: {}", e))),
        }
    }

    /// Point new sessions at a key, or clear the pointer.
    pub fn set_active(&self, id: Option<String>) -> Result<()> {
        if let Some(id) = &id {
            if self.get_key(id)?.is_none() {
                return Err(Error::NotFound(format!("key '{}'", id)));
            }
        }
        let bytes = serde_json::to_vec_pretty(&ActivePointer { active: id })
            .map_err(|e| Error::Metadata(e.to_string()))?;
        config::write_atomic(&self.state_path, &bytes)
    }

    fn write_keys(&self, keys: &[KeyMetadata]) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(keys).map_err(|e| Error::Metadata(e.to_string()))?;
        config::write_atomic(&self.keys_path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> KeyMetadata {
        KeyMetadata {
            id: id.to_string(),
            label: format!("key {}", id),
            npub: format!("npub1{}", id),
            created_at: chrono::Utc::now().to_rfc3339(),
            vault_account: format!("key-{}", id),
            storage_kind: StorageKind::EncryptedFile,
        }
    }

    fn test_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetadataStore::open(&Config::new(dir.path())).expect("open");
        (dir, store)
    }

    #[test]
    fn test_empty_on_missing_files() {
        let (_dir, store) = test_store();
        assert!(store.list_keys().expect("list").is_empty());
        assert!(store.active_key().expect("active").is_none());
    }

    #[test]
    fn test_add_and_get_round_trip() {
        let (_dir, store) = test_store();
        let key = meta("ab12");
        store.add_key(key.clone()).expect("add");

        let loaded = store.get_key("ab12").expect("get").expect("exists");
        assert_eq!(loaded, key);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_dir, store) = test_store();
        store.add_key(meta("ab12")).expect("add");
        assert!(store.add_key(meta("ab12")).is_err());
    }

    #[test]
    fn test_active_pointer_follows_deletion() {
        let (_dir, store) = test_store();
        store.add_key(meta("one")).expect("add");
        store.add_key(meta("two")).expect("add");
        store.set_active(Some("two".into())).expect("set");

        store.remove_key("two").expect("remove");
        assert_eq!(store.active_key().expect("active").as_deref(), Some("one"));

        store.remove_key("one").expect("remove");
        assert!(store.active_key().expect("active").is_none());
    }

    #[test]
    fn test_set_active_unknown_key_fails() {
        let (_dir, store) = test_store();
        assert!(store.set_active(Some("ghost".into())).is_err());
    }

    #[test]
    fn test_remove_missing_key_is_none() {
        let (_dir, store) = test_store();
        assert!(store.remove_key("ghost").expect("remove").is_none());
    }
}
