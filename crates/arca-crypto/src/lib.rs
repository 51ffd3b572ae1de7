pub mod aes_gcm;
pub mod chacha20_poly1305;
pub mod key;
pub mod mac;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use arca_types::error::Result;

use self::key::MasterKey;

/// Length of the random nonce prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;
/// Length of the AEAD tag appended to every ciphertext.
pub const AEAD_TAG_LEN: usize = 16;
/// Smallest possible encrypted payload: nonce plus tag around an empty message.
pub const CIPHERTEXT_OVERHEAD: usize = NONCE_LEN + AEAD_TAG_LEN;

/// Cipher used for every object in a repository. Chosen at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncryptionMode {
    #[default]
    #[serde(rename = "aes256gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20poly1305")]
    Chacha20Poly1305,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::Aes256Gcm => "aes256gcm",
            EncryptionMode::Chacha20Poly1305 => "chacha20poly1305",
        }
    }
}

/// Trait for encrypting, decrypting and authenticating repository objects.
pub trait CryptoEngine: Send + Sync {
    /// Encrypt plaintext. Returns `[nonce][ciphertext+tag]`.
    /// `aad` is authenticated but not encrypted (e.g., the type tag byte).
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt data produced by `encrypt`.
    /// `aad` must match what was passed during encryption.
    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// The key used for computing blob IDs (keyed BLAKE2b-256).
    fn blob_id_key(&self) -> &[u8; 32];

    /// The key used for pack authentication tags.
    fn mac_key(&self) -> &[u8; 32];

    fn mode(&self) -> EncryptionMode;

    /// Keyed BLAKE2b-128 tag over `data`.
    fn compute_tag(&self, data: &[u8]) -> [u8; mac::PACK_TAG_LEN] {
        mac::compute_tag(self.mac_key(), data)
    }

    /// Constant-time verification of a tag produced by `compute_tag`.
    fn verify_tag(&self, data: &[u8], tag: &[u8]) -> Result<()> {
        mac::verify_tag(self.mac_key(), data, tag)
    }
}

/// Build the engine for `mode` from an unwrapped master key.
pub fn engine_for(mode: EncryptionMode, key: &MasterKey) -> Result<Arc<dyn CryptoEngine>> {
    Ok(match mode {
        EncryptionMode::Aes256Gcm => Arc::new(aes_gcm::Aes256GcmEngine::new(key)?),
        EncryptionMode::Chacha20Poly1305 => {
            Arc::new(chacha20_poly1305::ChaCha20Poly1305Engine::new(key)?)
        }
    })
}
