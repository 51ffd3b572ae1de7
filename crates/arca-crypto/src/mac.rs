//! Pack authentication tags: keyed BLAKE2b-128 under the repository MAC key.

use blake2::Blake2bMac;
use blake2::digest::Mac;
use blake2::digest::consts::U16;

use arca_types::error::{ArcaError, Result};

pub const PACK_TAG_LEN: usize = 16;

type KeyedBlake2b128 = Blake2bMac<U16>;

pub fn compute_tag(key: &[u8; 32], data: &[u8]) -> [u8; PACK_TAG_LEN] {
    let mut mac = KeyedBlake2b128::new_from_slice(key).expect("valid 32-byte key for BLAKE2b");
    Mac::update(&mut mac, data);
    let mut out = [0u8; PACK_TAG_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub fn verify_tag(key: &[u8; 32], data: &[u8], tag: &[u8]) -> Result<()> {
    let mut mac = KeyedBlake2b128::new_from_slice(key).expect("valid 32-byte key for BLAKE2b");
    Mac::update(&mut mac, data);
    mac.verify_slice(tag)
        .map_err(|_| ArcaError::Integrity("pack authentication tag mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_depends_on_key() {
        let a = compute_tag(&[1; 32], b"data");
        let b = compute_tag(&[2; 32], b"data");
        assert_ne!(a, b);
        assert!(verify_tag(&[2; 32], b"data", &a).is_err());
    }

    #[test]
    fn short_tag_rejected() {
        let tag = compute_tag(&[1; 32], b"data");
        assert!(verify_tag(&[1; 32], b"data", &tag[..8]).is_err());
    }
}
