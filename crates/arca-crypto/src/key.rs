use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use arca_types::error::{ArcaError, Result};

pub const KEYS_PREFIX: &str = "keys/";

/// The master key material. Never stored in plaintext; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    pub encryption_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub id_key: [u8; 32],
}

/// Serialized payload inside the wrapped key blob.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct MasterKeyPayload {
    encryption_key: Vec<u8>,
    mac_key: Vec<u8>,
    id_key: Vec<u8>,
}

/// Argon2id cost parameters used when wrapping a master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    /// Memory in KiB.
    #[serde(default = "default_memory_cost")]
    pub memory_cost: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_time_cost() -> u32 {
    3
}

fn default_memory_cost() -> u32 {
    65536
}

fn default_parallelism() -> u32 {
    4
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            time_cost: default_time_cost(),
            memory_cost: default_memory_cost(),
            parallelism: default_parallelism(),
        }
    }
}

/// KDF parameters stored alongside the wrapped key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

/// On-disk format stored at `keys/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub kdf: KdfParams,
    pub nonce: Vec<u8>,
    pub encrypted_payload: Vec<u8>,
    pub created: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
}

impl EncryptedKey {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// Generate a random identifier for a new key file.
pub fn new_key_id() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn key_storage_key(id: &str) -> String {
    format!("{KEYS_PREFIX}{id}")
}

impl MasterKey {
    /// Generate a new random master key using OS entropy.
    pub fn generate() -> Self {
        let mut key = Self::from_parts([0u8; 32], [0u8; 32], [0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut key.encryption_key);
        rand::rngs::OsRng.fill_bytes(&mut key.mac_key);
        rand::rngs::OsRng.fill_bytes(&mut key.id_key);
        key
    }

    pub fn from_parts(encryption_key: [u8; 32], mac_key: [u8; 32], id_key: [u8; 32]) -> Self {
        Self {
            encryption_key,
            mac_key,
            id_key,
        }
    }

    /// Wrap the master key with a passphrase using Argon2id + AES-256-GCM.
    pub fn to_encrypted(
        &self,
        passphrase: &str,
        cost: &KdfCost,
        hostname: &str,
        username: &str,
    ) -> Result<EncryptedKey> {
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let kdf = KdfParams {
            algorithm: "argon2id".to_string(),
            time_cost: cost.time_cost,
            memory_cost: cost.memory_cost,
            parallelism: cost.parallelism,
            salt,
        };
        let wrapping_key = derive_key_from_passphrase(passphrase, &kdf)?;

        let payload = MasterKeyPayload {
            encryption_key: self.encryption_key.to_vec(),
            mac_key: self.mac_key.to_vec(),
            id_key: self.id_key.to_vec(),
        };
        let plaintext = Zeroizing::new(rmp_serde::to_vec(&payload)?);

        // KDF params are bound as AAD so they cannot be swapped undetected.
        let kdf_aad = kdf_params_aad(&kdf)?;
        let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
            .map_err(|e| ArcaError::KeyDerivation(format!("cipher init: {e}")))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_ref(),
                    aad: &kdf_aad,
                },
            )
            .map_err(|e| ArcaError::KeyDerivation(format!("encrypt: {e}")))?;

        Ok(EncryptedKey {
            kdf,
            nonce: nonce_bytes.to_vec(),
            encrypted_payload: ciphertext,
            created: Utc::now(),
            hostname: hostname.to_string(),
            username: username.to_string(),
        })
    }

    /// Unwrap the master key from its on-disk format.
    pub fn from_encrypted(encrypted: &EncryptedKey, passphrase: &str) -> Result<Self> {
        if encrypted.kdf.algorithm != "argon2id" {
            return Err(ArcaError::KeyDerivation(format!(
                "unsupported kdf '{}'",
                encrypted.kdf.algorithm
            )));
        }
        if encrypted.nonce.len() != 12 {
            return Err(ArcaError::DecryptionFailed);
        }
        let wrapping_key = derive_key_from_passphrase(passphrase, &encrypted.kdf)?;

        let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
            .map_err(|_| ArcaError::DecryptionFailed)?;
        let nonce = Nonce::from_slice(&encrypted.nonce);
        let kdf_aad = kdf_params_aad(&encrypted.kdf)?;
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: encrypted.encrypted_payload.as_ref(),
                    aad: &kdf_aad,
                },
            )
            .map_err(|_| ArcaError::DecryptionFailed)?;
        let plaintext = Zeroizing::new(plaintext);

        let payload: MasterKeyPayload =
            rmp_serde::from_slice(&plaintext).map_err(|_| ArcaError::DecryptionFailed)?;

        let mut key = Self::from_parts([0u8; 32], [0u8; 32], [0u8; 32]);
        if payload.encryption_key.len() != 32
            || payload.mac_key.len() != 32
            || payload.id_key.len() != 32
        {
            return Err(ArcaError::DecryptionFailed);
        }
        key.encryption_key.copy_from_slice(&payload.encryption_key);
        key.mac_key.copy_from_slice(&payload.mac_key);
        key.id_key.copy_from_slice(&payload.id_key);
        Ok(key)
    }
}

fn kdf_params_aad(kdf: &KdfParams) -> Result<Vec<u8>> {
    rmp_serde::to_vec(kdf).map_err(|e| ArcaError::KeyDerivation(format!("serialize kdf aad: {e}")))
}

/// Derive a 32-byte key from a passphrase using Argon2id.
fn derive_key_from_passphrase(passphrase: &str, kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| ArcaError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), &kdf.salt, output.as_mut())
        .map_err(|e| ArcaError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}
