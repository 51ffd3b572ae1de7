use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::key::MasterKey;
use super::{AEAD_TAG_LEN, CryptoEngine, EncryptionMode, NONCE_LEN};
use arca_types::error::{ArcaError, Result};

/// AES-256-GCM authenticated encryption engine.
pub struct Aes256GcmEngine {
    cipher: Aes256Gcm,
    id_key: Zeroizing<[u8; 32]>,
    mac_key: Zeroizing<[u8; 32]>,
}

impl Aes256GcmEngine {
    pub fn new(key: &MasterKey) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key.encryption_key)
            .map_err(|e| ArcaError::KeyDerivation(format!("AES-256-GCM key: {e}")))?;
        Ok(Self {
            cipher,
            id_key: Zeroizing::new(key.id_key),
            mac_key: Zeroizing::new(key.mac_key),
        })
    }
}

impl CryptoEngine for Aes256GcmEngine {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| ArcaError::Other(format!("AES-GCM encrypt: {e}")))?;

        // Wire format: [12-byte nonce][ciphertext with appended 16-byte tag]
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + AEAD_TAG_LEN {
            return Err(ArcaError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| ArcaError::DecryptionFailed)
    }

    fn blob_id_key(&self) -> &[u8; 32] {
        &self.id_key
    }

    fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    fn mode(&self) -> EncryptionMode {
        EncryptionMode::Aes256Gcm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> Aes256GcmEngine {
        Aes256GcmEngine::new(&MasterKey::from_parts([0x11; 32], [0x22; 32], [0x33; 32])).unwrap()
    }

    #[test]
    fn ciphertext_different_from_plaintext() {
        let engine = test_engine();
        let data = b"secret message";
        let encrypted = engine.encrypt(data, b"aad").unwrap();
        assert_ne!(&encrypted[NONCE_LEN..NONCE_LEN + data.len()], data.as_slice());
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let engine = test_engine();
        let encrypted = engine.encrypt(b"", b"tag").unwrap();
        assert_eq!(encrypted.len(), NONCE_LEN + AEAD_TAG_LEN);
        assert_eq!(engine.decrypt(&encrypted, b"tag").unwrap(), b"");
    }

    #[test]
    fn keys_are_exposed_separately() {
        let engine = test_engine();
        assert_eq!(engine.mac_key(), &[0x22; 32]);
        assert_eq!(engine.blob_id_key(), &[0x33; 32]);
    }
}
