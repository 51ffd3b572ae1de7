use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use arca_crypto::CryptoEngine;
use arca_crypto::mac::PACK_TAG_LEN;
use arca_storage::StorageBackend;
use arca_types::error::{ArcaError, Result};
use arca_types::{BlobHandle, BlobId, BlobType, PackId};

use super::format::{ObjectType, pack_object, unpack_object_expect};
use crate::compress::{self, Compression};

/// Trailer after the encrypted header: `[u32 LE header length][pack tag]`.
pub const PACK_TRAILER_LEN: usize = 4 + PACK_TAG_LEN;

/// Maximum number of blobs in a single pack file.
pub const MAX_BLOBS_PER_PACK: usize = 10_000;

/// Maximum age of an open pack writer before it should be flushed (in seconds).
pub const PACK_MAX_AGE_SECS: u64 = 300;

/// Skip upfront `reserve()` for unreasonably large targets.
const MAX_PREALLOC_SIZE: usize = 256 * 1024 * 1024;

/// One entry in the pack's trailing header. Describes a single stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackHeaderEntry {
    pub blob_type: BlobType,
    pub id: BlobId,
    pub offset: u32,
    pub length: u32,
    pub uncompressed_length: u32,
}

impl PackHeaderEntry {
    pub fn handle(&self) -> BlobHandle {
        BlobHandle::new(self.id, self.blob_type)
    }
}

/// A pack assembled in memory, ready for upload.
#[derive(Debug)]
pub struct SealedPack {
    pub pack_id: PackId,
    pub bytes: Vec<u8>,
    pub entries: Vec<PackHeaderEntry>,
}

fn blob_object_type(blob_type: BlobType) -> ObjectType {
    match blob_type {
        BlobType::Data => ObjectType::BlobData,
        BlobType::Tree => ObjectType::BlobTree,
    }
}

/// Compress and encrypt a plaintext blob into its stored form. The blob ID
/// is the encryption context, so stored bytes cannot be replayed under
/// another ID.
pub fn encode_blob(
    handle: &BlobHandle,
    plaintext: &[u8],
    compression: Compression,
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let compressed = compress::compress(compression, plaintext)?;
    pack_object(
        blob_object_type(handle.blob_type),
        handle.id.as_bytes(),
        &compressed,
        crypto,
    )
}

/// Decrypt and decompress a stored blob, then check that its content hashes
/// to the requested ID.
pub fn decode_blob(
    handle: &BlobHandle,
    stored: &[u8],
    uncompressed_hint: Option<usize>,
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let compressed = unpack_object_expect(
        stored,
        blob_object_type(handle.blob_type),
        handle.id.as_bytes(),
        crypto,
    )?;
    let plaintext = compress::decompress_with_hint(&compressed, uncompressed_hint)?;
    let actual = BlobId::compute(crypto.blob_id_key(), &plaintext);
    if actual != handle.id {
        return Err(ArcaError::Integrity(format!(
            "blob {handle} decodes to content with id {actual}"
        )));
    }
    Ok(plaintext)
}

/// Accumulates stored blobs of one type and seals them into pack files.
///
/// Blob bytes are appended directly to the pack buffer, so sealing only has
/// to append the header trailer.
pub struct PackWriter {
    pack_type: BlobType,
    target_size: usize,
    pack_bytes: Vec<u8>,
    entries: Vec<PackHeaderEntry>,
    /// Blob ID -> position in `entries`.
    pending: HashMap<BlobId, usize>,
    first_blob_time: Option<Instant>,
}

impl PackWriter {
    pub fn new(pack_type: BlobType, target_size: usize) -> Self {
        Self {
            pack_type,
            target_size,
            pack_bytes: Vec::new(),
            entries: Vec::new(),
            pending: HashMap::new(),
            first_blob_time: None,
        }
    }

    /// Append a stored blob. Returns its offset within the pack.
    pub fn add_blob(&mut self, id: BlobId, stored: &[u8], uncompressed_length: u32) -> Result<u32> {
        let offset = u32::try_from(self.pack_bytes.len())
            .map_err(|_| ArcaError::Other("pack buffer exceeds 4 GiB".into()))?;
        let length = u32::try_from(stored.len())
            .map_err(|_| ArcaError::Other(format!("blob {id} too large for a pack")))?;

        if self.entries.is_empty() {
            if self.pack_bytes.capacity() == 0 && self.target_size <= MAX_PREALLOC_SIZE {
                self.pack_bytes.reserve(self.target_size);
            }
            self.first_blob_time = Some(Instant::now());
        }
        self.pack_bytes.extend_from_slice(stored);
        self.pending.insert(id, self.entries.len());
        self.entries.push(PackHeaderEntry {
            blob_type: self.pack_type,
            id,
            offset,
            length,
            uncompressed_length,
        });
        Ok(offset)
    }

    /// Whether a blob is buffered in this writer.
    pub fn contains(&self, id: &BlobId) -> bool {
        self.pending.contains_key(id)
    }

    /// Whether the buffer has reached its size or blob-count target, or has
    /// been open for too long.
    pub fn should_flush(&self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.pack_bytes.len() >= self.target_size
            || self.entries.len() >= MAX_BLOBS_PER_PACK
            || self
                .first_blob_time
                .is_some_and(|t| t.elapsed().as_secs() >= PACK_MAX_AGE_SECS)
    }

    /// The stored bytes and uncompressed length of a buffered blob.
    pub fn stored_blob(&self, id: &BlobId) -> Option<(&[u8], u32)> {
        let entry = &self.entries[*self.pending.get(id)?];
        let start = entry.offset as usize;
        let stored = self.pack_bytes.get(start..start + entry.length as usize)?;
        Some((stored, entry.uncompressed_length))
    }

    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn blob_count(&self) -> usize {
        self.entries.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.pack_bytes.len()
    }

    pub fn pack_type(&self) -> BlobType {
        self.pack_type
    }

    pub fn set_target_size(&mut self, target_size: usize) {
        self.target_size = target_size;
    }

    /// Append the encrypted header and trailer, compute the pack ID and reset
    /// the writer. On error the buffered blobs are left untouched.
    pub fn seal(&mut self, crypto: &dyn CryptoEngine) -> Result<SealedPack> {
        if self.entries.is_empty() {
            return Err(ArcaError::Other("cannot seal empty pack writer".into()));
        }

        let header_bytes = rmp_serde::to_vec(&self.entries)?;
        let encrypted_header = pack_object(ObjectType::PackHeader, &[], &header_bytes, crypto)?;
        let header_len = u32::try_from(encrypted_header.len())
            .map_err(|_| ArcaError::Other("pack header exceeds 4 GiB".into()))?;

        let mut trailer = encrypted_header;
        trailer.extend_from_slice(&header_len.to_le_bytes());
        let tag = crypto.compute_tag(&trailer);

        let mut bytes = std::mem::take(&mut self.pack_bytes);
        bytes.extend_from_slice(&trailer);
        bytes.extend_from_slice(&tag);
        let pack_id = PackId::compute(&bytes);

        let entries = std::mem::take(&mut self.entries);
        self.pending.clear();
        self.first_blob_time = None;

        Ok(SealedPack {
            pack_id,
            bytes,
            entries,
        })
    }
}

/// Read one stored blob from a pack with a single range read.
pub fn read_blob_from_pack(
    storage: &dyn StorageBackend,
    pack_id: &PackId,
    offset: u32,
    length: u32,
) -> Result<Vec<u8>> {
    let key = pack_id.storage_key();
    storage
        .get_range(&key, u64::from(offset), u64::from(length))?
        .ok_or(ArcaError::NotFound(key))
}

/// Locate, authenticate and decrypt the header of a stored pack.
///
/// Issues one size query and two range reads: the fixed-size trailer, then
/// the encrypted header together with its length field.
pub fn read_pack_header(
    storage: &dyn StorageBackend,
    pack_id: &PackId,
    crypto: &dyn CryptoEngine,
) -> Result<Vec<PackHeaderEntry>> {
    let key = pack_id.storage_key();
    let size = storage
        .size(&key)?
        .ok_or_else(|| ArcaError::NotFound(key.clone()))?;
    if size < PACK_TRAILER_LEN as u64 {
        return Err(ArcaError::Integrity(format!(
            "pack {pack_id} is too small ({size} bytes)"
        )));
    }

    let tail = storage
        .get_range(&key, size - PACK_TRAILER_LEN as u64, PACK_TRAILER_LEN as u64)?
        .ok_or_else(|| ArcaError::NotFound(key.clone()))?;
    let Some((len_bytes, tag)) = tail.split_first_chunk::<4>() else {
        return Err(ArcaError::Integrity(format!("pack {pack_id}: short trailer")));
    };
    let header_len = u64::from(u32::from_le_bytes(*len_bytes));
    let header_start = (size - PACK_TRAILER_LEN as u64)
        .checked_sub(header_len)
        .ok_or_else(|| {
            ArcaError::Integrity(format!(
                "pack {pack_id}: header length {header_len} exceeds pack size {size}"
            ))
        })?;

    let authenticated = storage
        .get_range(&key, header_start, header_len + 4)?
        .ok_or_else(|| ArcaError::NotFound(key.clone()))?;
    crypto
        .verify_tag(&authenticated, tag)
        .map_err(|e| e.context(format!("pack {pack_id}")))?;

    let encrypted_header = &authenticated[..header_len as usize];
    let header_bytes =
        unpack_object_expect(encrypted_header, ObjectType::PackHeader, &[], crypto)?;
    let entries: Vec<PackHeaderEntry> = rmp_serde::from_slice(&header_bytes)
        .map_err(|e| ArcaError::Integrity(format!("pack {pack_id}: malformed header: {e}")))?;

    for entry in &entries {
        let end = u64::from(entry.offset) + u64::from(entry.length);
        if end > header_start {
            return Err(ArcaError::Integrity(format!(
                "pack {pack_id}: entry {} ({}..{end}) overlaps header at {header_start}",
                entry.handle(),
                entry.offset
            )));
        }
    }
    Ok(entries)
}

/// Compute the dynamic target pack size for data packs. Targets grow with
/// the square root of the pack count so large repositories hold fewer,
/// larger packs.
pub fn compute_data_pack_target(
    num_data_packs: usize,
    min_pack_size: u32,
    max_pack_size: u32,
) -> usize {
    let min = f64::from(min_pack_size);
    let max = f64::from(max_pack_size);
    let target = min * (num_data_packs as f64 / 100.0).sqrt();
    target.clamp(min, max) as usize
}

/// Compute the target pack size for tree packs.
pub fn compute_tree_pack_target(min_pack_size: u32) -> usize {
    let four_mib = 4 * 1024 * 1024;
    std::cmp::min(min_pack_size as usize, four_mib)
}
