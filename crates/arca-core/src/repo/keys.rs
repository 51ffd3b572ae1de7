//! Passphrase management. Every key file wraps the same master key, so
//! adding, removing or rotating passphrases never touches stored data.

use chrono::{DateTime, Utc};
use tracing::info;

use arca_crypto::key::{EncryptedKey, key_storage_key, new_key_id};
use arca_storage::paths::{KEYS_DIR, object_name};
use arca_types::error::{ArcaError, Result};

use super::Repository;
use crate::platform;

/// Metadata of one key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub id: String,
    pub created: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
    /// Whether this key unlocked the current handle.
    pub current: bool,
}

impl Repository {
    pub fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let mut keys = Vec::new();
        for key in self.storage.list(KEYS_DIR)? {
            let Some(data) = self.storage.get(&key)? else {
                continue;
            };
            let encrypted = EncryptedKey::from_bytes(&data)?;
            let id = object_name(&key).to_string();
            keys.push(KeyInfo {
                current: id == self.key_id,
                id,
                created: encrypted.created,
                hostname: encrypted.hostname,
                username: encrypted.username,
            });
        }
        keys.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(keys)
    }

    /// Add a key file for another passphrase. Returns the new key ID.
    pub fn add_key(&self, passphrase: &str) -> Result<String> {
        let id = new_key_id();
        let wrapped = self.master_key.to_encrypted(
            passphrase,
            &self.engine.kdf,
            &platform::hostname(),
            &platform::username(),
        )?;
        self.storage.put(&key_storage_key(&id), &wrapped.to_bytes()?)?;
        info!(key_id = %id, "added key");
        Ok(id)
    }

    /// Remove a key file. Refuses to remove the key in use or the last key.
    pub fn remove_key(&mut self, id: &str) -> Result<()> {
        self.require_lock(true)?;
        if id == self.key_id {
            return Err(ArcaError::Other(
                "refusing to remove the key used to open the repository".into(),
            ));
        }
        let keys = self.list_keys()?;
        if !keys.iter().any(|k| k.id == id) {
            return Err(ArcaError::NotFound(key_storage_key(id)));
        }
        if keys.len() <= 1 {
            return Err(ArcaError::Other("refusing to remove the last key".into()));
        }
        self.storage.delete(&key_storage_key(id))?;
        info!(key_id = %id, "removed key");
        Ok(())
    }

    /// Replace the passphrase of the current key. The new key file is
    /// written before the old one is deleted. Returns the new key ID.
    pub fn change_passphrase(&mut self, new_passphrase: &str) -> Result<String> {
        self.require_lock(true)?;
        let new_id = self.add_key(new_passphrase)?;
        let old_id = std::mem::replace(&mut self.key_id, new_id.clone());
        self.storage.delete(&key_storage_key(&old_id))?;
        info!(old_key_id = %old_id, key_id = %new_id, "changed passphrase");
        Ok(new_id)
    }
}
