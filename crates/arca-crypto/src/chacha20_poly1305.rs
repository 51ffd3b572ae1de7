use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::key::MasterKey;
use super::{AEAD_TAG_LEN, CryptoEngine, EncryptionMode, NONCE_LEN};
use arca_types::error::{ArcaError, Result};

/// ChaCha20-Poly1305 authenticated encryption engine.
pub struct ChaCha20Poly1305Engine {
    cipher: ChaCha20Poly1305,
    id_key: Zeroizing<[u8; 32]>,
    mac_key: Zeroizing<[u8; 32]>,
}

impl ChaCha20Poly1305Engine {
    pub fn new(key: &MasterKey) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new_from_slice(&key.encryption_key)
            .map_err(|e| ArcaError::KeyDerivation(format!("ChaCha20-Poly1305 key: {e}")))?;
        Ok(Self {
            cipher,
            id_key: Zeroizing::new(key.id_key),
            mac_key: Zeroizing::new(key.mac_key),
        })
    }
}

impl CryptoEngine for ChaCha20Poly1305Engine {
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
            .map_err(|e| ArcaError::Other(format!("ChaCha20-Poly1305 encrypt: {e}")))?;

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
        EncryptionMode::Chacha20Poly1305
    }
}
