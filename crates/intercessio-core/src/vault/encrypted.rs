//! Encrypted-file vault backend.
//!
//! Secrets are stored as AES-256-CBC ciphertext (random IV per entry,
//! PKCS#7 padding) in a JSON document. The cipher key is derived with
//! scrypt from a per-machine identifier and a random salt stored next to
//! the secrets file. Both files are written atomically.

use crate::config::{self, Config};
use crate::error::{Error, Result};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// AES block / IV length in bytes.
const IV_LEN: usize = 16;

/// scrypt cost parameters: N = 2^15, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultFile {
    /// account -> base64(iv || ciphertext)
    entries: BTreeMap<String, String>,
}

/// Vault backend storing AES-256-CBC ciphertext in a JSON file.
pub struct EncryptedVault {
    path: PathBuf,
    key: Zeroizing<[u8; 32]>,
    // File writes are read-modify-write; serialize them.
    write_lock: Mutex<()>,
}

impl EncryptedVault {
    /// Open the vault, creating the salt on first use.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_dir()?;
        let salt = load_or_create_salt(&config.salt_path())?;
        let key = derive_key(&machine_id(), &salt)?;

        Ok(Self {
            path: config.secrets_path(),
            key,
            write_lock: Mutex::new(()),
        })
    }

    /// Store a secret, overwriting any previous value.
    pub fn put(&self, account: &str, secret: &str) -> Result<()> {
        let _guard = self.lock();
        let mut file = self.load()?;
        let sealed = self.seal(secret.as_bytes())?;
        file.entries.insert(account.to_string(), sealed);
        self.save(&file)
    }

    /// Retrieve a secret.
    pub fn get(&self, account: &str) -> Result<Zeroizing<String>> {
        let file = self.load()?;
        let sealed = file
            .entries
            .get(account)
            .ok_or_else(|| Error::NotFound(format!("vault account '{}'", account)))?;
        let plain = self.unseal(sealed)?;
        let text = String::from_utf8(plain.to_vec())
            .map_err(|_| Error::Vault("stored secret is not valid UTF-8".into()))?;
        Ok(Zeroizing::new(text))
    }

    /// Remove a secret. Absent accounts are fine.
    pub fn delete(&self, account: &str) -> Result<()> {
        let _guard = self.lock();
        let mut file = self.load()?;
        if file.entries.remove(account).is_some() {
            self.save(&file)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load(&self) -> Result<VaultFile> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Vault(format!("corrupt vault file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VaultFile::default()),
            Err(e) => Err(Error::Vault(format!("failed to read vault: {}", e))),
        }
    }

    fn save(&self, file: &VaultFile) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(file).map_err(|e| Error::Vault(e.to_string()))?;
        config::write_atomic(&self.path, &bytes).map_err(|e| Error::Vault(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .map_err(|e| Error::Vault(format!("failed to set vault permissions: {}", e)))?;
        }

        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new((&*self.key).into(), (&iv).into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut combined = Vec::with_capacity(IV_LEN + ciphertext.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    fn unseal(&self, sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
        let combined = BASE64
            .decode(sealed)
            .map_err(|e| Error::Vault(format!("corrupt vault entry: {}", e)))?;
        if combined.len() < IV_LEN {
            return Err(Error::Vault("corrupt vault entry: too short".into()));
        }

        let (iv, ciphertext) = combined.split_at(IV_LEN);
        let cipher = Aes256CbcDec::new((&*self.key).into(), iv.into());
        let plain = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::Vault("failed to decrypt vault entry".into()))?;
        Ok(Zeroizing::new(plain))
    }
}

fn load_or_create_salt(path: &std::path::Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(salt) if salt.len() == SALT_LEN => Ok(salt),
        Ok(_) => Err(Error::Vault("corrupt vault salt".into())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut salt = vec![0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            config::write_atomic(path, &salt).map_err(|e| Error::Vault(e.to_string()))?;
            Ok(salt)
        }
        Err(e) => Err(Error::Vault(format!("failed to read vault salt: {}", e))),
    }
}

fn derive_key(identifier: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|e| Error::Vault(format!("invalid scrypt params: {}", e)))?;

    let mut key = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(identifier.as_bytes(), salt, &params, key.as_mut())
        .map_err(|e| Error::Vault(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// A stable per-machine identifier for vault key derivation. The random
/// salt provides uniqueness; this just binds the file to the host.
fn machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    "intercessio-local".to_string()
}
