pub mod rebuild;

use std::collections::{HashMap, HashSet};

use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use arca_crypto::CryptoEngine;
use arca_storage::StorageBackend;
use arca_storage::paths::{INDEX_DIR, index_key, object_name};
use arca_types::error::{ArcaError, Result, ResultExt};
use arca_types::{BlobHandle, BlobType, PackId};

use crate::repo::format::{ObjectType, pack_object, unpack_object_expect};
use crate::repo::pack::PackHeaderEntry;

pub use rebuild::{RebuildReport, list_packs, rebuild_index};

/// Location of one blob inside a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub pack_id: PackId,
    pub offset: u32,
    pub length: u32,
    pub uncompressed_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PackInfo {
    blob_type: BlobType,
    blob_count: usize,
}

/// In-memory index of every blob in the repository.
///
/// Shared between readers as an immutable `Arc<Index>` snapshot; writers
/// clone-on-write, and rebuilds swap in a complete replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Index {
    entries: HashMap<BlobHandle, IndexEntry>,
    packs: HashMap<PackId, PackInfo>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blob location. A later insert for the same handle replaces
    /// the earlier location.
    pub fn insert(&mut self, handle: BlobHandle, entry: IndexEntry) -> Option<IndexEntry> {
        let previous = self.entries.insert(handle, entry);
        if let Some(prev) = &previous {
            self.release_pack_ref(&prev.pack_id);
        }
        self.packs
            .entry(entry.pack_id)
            .or_insert(PackInfo {
                blob_type: handle.blob_type,
                blob_count: 0,
            })
            .blob_count += 1;
        previous
    }

    fn release_pack_ref(&mut self, pack_id: &PackId) {
        if let Some(info) = self.packs.get_mut(pack_id) {
            info.blob_count -= 1;
            if info.blob_count == 0 {
                self.packs.remove(pack_id);
            }
        }
    }

    /// Merge every entry of one pack header.
    pub fn add_pack(&mut self, pack_id: PackId, blobs: &[PackHeaderEntry]) {
        for blob in blobs {
            self.insert(
                blob.handle(),
                IndexEntry {
                    pack_id,
                    offset: blob.offset,
                    length: blob.length,
                    uncompressed_length: blob.uncompressed_length,
                },
            );
        }
    }

    pub fn get(&self, handle: &BlobHandle) -> Option<&IndexEntry> {
        self.entries.get(handle)
    }

    pub fn contains(&self, handle: &BlobHandle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlobHandle, &IndexEntry)> {
        self.entries.iter()
    }

    /// Packs holding at least one indexed blob.
    pub fn packs(&self) -> impl Iterator<Item = &PackId> {
        self.packs.keys()
    }

    pub fn contains_pack(&self, pack_id: &PackId) -> bool {
        self.packs.contains_key(pack_id)
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    pub fn data_pack_count(&self) -> usize {
        self.packs
            .values()
            .filter(|p| p.blob_type == BlobType::Data)
            .count()
    }

    /// Group the index by pack, in a stable order, for persisting.
    pub fn to_pack_list(&self) -> Vec<IndexPack> {
        let mut by_pack: HashMap<PackId, Vec<PackHeaderEntry>> = HashMap::new();
        for (handle, entry) in &self.entries {
            by_pack.entry(entry.pack_id).or_default().push(PackHeaderEntry {
                blob_type: handle.blob_type,
                id: handle.id,
                offset: entry.offset,
                length: entry.length,
                uncompressed_length: entry.uncompressed_length,
            });
        }
        let mut packs: Vec<IndexPack> = by_pack
            .into_iter()
            .map(|(pack_id, mut blobs)| {
                blobs.sort_by_key(|b| b.offset);
                IndexPack { pack_id, blobs }
            })
            .collect();
        packs.sort_by_key(|p| p.pack_id);
        packs
    }
}

/// The blobs one pack contributes to an index file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPack {
    pub pack_id: PackId,
    pub blobs: Vec<PackHeaderEntry>,
}

/// Persisted index object at `index/<id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    pub generation: u64,
    /// Index file IDs whose content this file replaces.
    #[serde(default)]
    pub supersedes: Vec<String>,
    pub packs: Vec<IndexPack>,
}

/// Result of loading every persisted index file.
#[derive(Debug, Default)]
pub struct LoadedIndex {
    pub index: Index,
    /// Every index file ID seen, superseded ones included.
    pub files: Vec<String>,
    pub max_generation: u64,
}

pub fn new_index_id() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Encrypt and upload an index file. Returns its ID.
pub fn write_index_file(
    storage: &dyn StorageBackend,
    crypto: &dyn CryptoEngine,
    file: &IndexFile,
) -> Result<String> {
    let id = new_index_id();
    let payload = rmp_serde::to_vec(file)?;
    let object = pack_object(ObjectType::IndexFile, id.as_bytes(), &payload, crypto)?;
    storage
        .put(&index_key(&id), &object)
        .with_context(|| format!("writing index file {id}"))?;
    debug!(
        index_id = %id,
        generation = file.generation,
        packs = file.packs.len(),
        "wrote index file"
    );
    Ok(id)
}

/// Read one index file. `Ok(None)` if it vanished since it was listed.
pub fn read_index_file(
    storage: &dyn StorageBackend,
    crypto: &dyn CryptoEngine,
    id: &str,
) -> Result<Option<IndexFile>> {
    let Some(data) = storage.get(&index_key(id))? else {
        return Ok(None);
    };
    let plaintext = unpack_object_expect(&data, ObjectType::IndexFile, id.as_bytes(), crypto)?;
    let file = rmp_serde::from_slice(&plaintext)?;
    Ok(Some(file))
}

pub fn list_index_files(storage: &dyn StorageBackend) -> Result<Vec<String>> {
    let mut ids: Vec<String> = storage
        .list(INDEX_DIR)?
        .iter()
        .map(|key| object_name(key).to_string())
        .collect();
    ids.sort();
    Ok(ids)
}

/// Load all index files and merge them into one index.
///
/// Files named in another file's `supersedes` list are skipped. The rest
/// are applied in ascending `(generation, id)` order, so for a handle that
/// appears more than once the highest generation wins. Nothing is deleted.
pub fn load_index(storage: &dyn StorageBackend, crypto: &dyn CryptoEngine) -> Result<LoadedIndex> {
    let ids = list_index_files(storage)?;
    let files: Vec<(String, Option<IndexFile>)> = ids
        .into_par_iter()
        .map(|id| {
            let file = read_index_file(storage, crypto, &id)
                .with_context(|| format!("loading index file {id}"))?;
            Ok((id, file))
        })
        .collect::<Result<_>>()?;

    let mut loaded = LoadedIndex::default();
    let mut present = Vec::with_capacity(files.len());
    for (id, file) in files {
        loaded.files.push(id.clone());
        match file {
            Some(file) => present.push((id, file)),
            None => debug!(index_id = %id, "index file vanished while loading"),
        }
    }

    let superseded: HashSet<&str> = present
        .iter()
        .flat_map(|(_, f)| f.supersedes.iter().map(String::as_str))
        .collect();
    loaded.max_generation = present.iter().map(|(_, f)| f.generation).max().unwrap_or(0);

    let mut active: Vec<&(String, IndexFile)> = present
        .iter()
        .filter(|(id, _)| !superseded.contains(id.as_str()))
        .collect();
    active.sort_by(|a, b| (a.1.generation, &a.0).cmp(&(b.1.generation, &b.0)));

    for (_, file) in &active {
        for pack in &file.packs {
            loaded.index.add_pack(pack.pack_id, &pack.blobs);
        }
    }
    info!(
        files = loaded.files.len(),
        applied = active.len(),
        blobs = loaded.index.len(),
        packs = loaded.index.pack_count(),
        "loaded index"
    );
    Ok(loaded)
}

/// Write `index` as one complete index file that supersedes `previous`,
/// then delete the superseded files. Returns the new file's ID.
///
/// The new file is durable before anything is deleted, so a crash between
/// the two steps leaves redundant but consistent index files.
pub fn persist_full_index(
    storage: &dyn StorageBackend,
    crypto: &dyn CryptoEngine,
    index: &Index,
    generation: u64,
    previous: &[String],
) -> Result<String> {
    let file = IndexFile {
        generation,
        supersedes: previous.to_vec(),
        packs: index.to_pack_list(),
    };
    let id = write_index_file(storage, crypto, &file)?;
    for old in previous {
        if old == &id {
            continue;
        }
        storage
            .delete(&index_key(old))
            .with_context(|| format!("deleting superseded index file {old}"))?;
    }
    info!(
        index_id = %id,
        superseded = previous.len(),
        blobs = index.len(),
        "wrote full index"
    );
    Ok(id)
}

/// Look up a blob, failing with `BlobNotFound` if it is not indexed.
pub fn lookup(index: &Index, handle: &BlobHandle) -> Result<IndexEntry> {
    index
        .get(handle)
        .copied()
        .ok_or(ArcaError::BlobNotFound(*handle))
}
