use arca_crypto::CryptoEngine;
use arca_types::error::{ArcaError, Result};

/// Domain-separation marker for object identity binding in AEAD AAD.
const OBJECT_CONTEXT_AAD_PREFIX: &[u8] = b"arca:object-context:v1\0";

/// Object type tags for the repo envelope format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    PackHeader = 1,
    BlobData = 2,
    BlobTree = 3,
    IndexFile = 4,
    Snapshot = 5,
    Lock = 6,
}

impl ObjectType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::PackHeader),
            2 => Ok(Self::BlobData),
            3 => Ok(Self::BlobTree),
            4 => Ok(Self::IndexFile),
            5 => Ok(Self::Snapshot),
            6 => Ok(Self::Lock),
            _ => Err(ArcaError::UnknownObjectType(v)),
        }
    }
}

fn contextual_aad(tag: u8, context: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + OBJECT_CONTEXT_AAD_PREFIX.len() + context.len());
    aad.push(tag);
    aad.extend_from_slice(OBJECT_CONTEXT_AAD_PREFIX);
    aad.extend_from_slice(context);
    aad
}

/// Encrypt a payload into a repo object bound to `context`.
///
/// Wire format: `[1-byte type tag][12-byte nonce][ciphertext + 16-byte tag]`.
/// The AAD covers the type tag and the context (the object's identity), so
/// an object copied under another name or type fails to decrypt.
pub fn pack_object(
    obj_type: ObjectType,
    context: &[u8],
    plaintext: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let tag = obj_type as u8;
    let encrypted = crypto.encrypt(plaintext, &contextual_aad(tag, context))?;

    let mut out = Vec::with_capacity(1 + encrypted.len());
    out.push(tag);
    out.extend_from_slice(&encrypted);
    Ok(out)
}

/// Decrypt a repo object that must have type `expected` and identity `context`.
///
/// Any mismatch (type byte, context, ciphertext) is an integrity failure.
pub fn unpack_object_expect(
    data: &[u8],
    expected: ObjectType,
    context: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let Some((&tag, encrypted)) = data.split_first() else {
        return Err(ArcaError::InvalidFormat("empty object".into()));
    };
    // Authenticate against the expected type so a rewritten tag byte is
    // reported as tampering, not as a format problem.
    let plaintext = crypto.decrypt(encrypted, &contextual_aad(expected as u8, context))?;
    if tag != expected as u8 {
        return Err(ArcaError::Integrity(format!(
            "object type mismatch: expected {expected:?}, found tag {tag}"
        )));
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_crypto::key::MasterKey;
    use arca_crypto::{EncryptionMode, engine_for};

    fn crypto() -> std::sync::Arc<dyn CryptoEngine> {
        engine_for(EncryptionMode::Aes256Gcm, &MasterKey::generate()).unwrap()
    }

    #[test]
    fn roundtrip_with_context() {
        let crypto = crypto();
        let obj = pack_object(ObjectType::Snapshot, b"id-1", b"payload", crypto.as_ref()).unwrap();
        assert_eq!(obj[0], ObjectType::Snapshot as u8);
        let plain =
            unpack_object_expect(&obj, ObjectType::Snapshot, b"id-1", crypto.as_ref()).unwrap();
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn wrong_context_fails_authentication() {
        let crypto = crypto();
        let obj = pack_object(ObjectType::IndexFile, b"a", b"payload", crypto.as_ref()).unwrap();
        let err =
            unpack_object_expect(&obj, ObjectType::IndexFile, b"b", crypto.as_ref()).unwrap_err();
        assert!(err.is_integrity(), "{err}");
    }

    #[test]
    fn wrong_type_fails_authentication() {
        let crypto = crypto();
        let obj = pack_object(ObjectType::BlobData, b"a", b"payload", crypto.as_ref()).unwrap();
        let err =
            unpack_object_expect(&obj, ObjectType::BlobTree, b"a", crypto.as_ref()).unwrap_err();
        assert!(err.is_integrity(), "{err}");

        let mut retagged = obj.clone();
        retagged[0] = ObjectType::BlobTree as u8;
        let err = unpack_object_expect(&retagged, ObjectType::BlobData, b"a", crypto.as_ref())
            .unwrap_err();
        assert!(err.is_integrity(), "{err}");
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(matches!(
            ObjectType::from_u8(0),
            Err(ArcaError::UnknownObjectType(0))
        ));
        assert_eq!(ObjectType::from_u8(6).unwrap(), ObjectType::Lock);
    }

    #[test]
    fn empty_object_is_invalid() {
        let crypto = crypto();
        let err = unpack_object_expect(&[], ObjectType::Lock, b"", crypto.as_ref()).unwrap_err();
        assert!(matches!(err, ArcaError::InvalidFormat(_)));
    }
}
