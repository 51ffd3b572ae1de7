//! Removal of blobs no snapshot references.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use arca_types::error::{ArcaError, Result, ResultExt};
use arca_types::{BlobHandle, BlobType, PackId};

use crate::index::{Index, IndexEntry, list_packs};
use crate::repo::Repository;
use crate::repo::pack::{decode_blob, read_blob_from_pack, read_pack_header};
use crate::snapshot::{NodeType, SnapshotFilter, Visit, walk};

/// Statistics returned by [`prune`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub snapshots: usize,
    pub blobs_live: usize,
    pub blobs_unused: usize,
    /// Stored (compressed and encrypted) size of the unused blobs.
    pub unused_bytes: u64,
    pub packs_kept: usize,
    pub packs_repacked: usize,
    pub packs_deleted: usize,
    pub blobs_repacked: usize,
    pub repacked_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackAction {
    Keep,
    Repack,
    Delete,
}

struct PackUsage {
    live: Vec<(BlobHandle, IndexEntry)>,
    total_blobs: usize,
    total_bytes: u64,
    live_bytes: u64,
}

impl PackUsage {
    fn action(&self, repack_threshold: f64) -> PackAction {
        if self.live.is_empty() {
            PackAction::Delete
        } else if (self.live_bytes as f64) < self.total_bytes as f64 * repack_threshold {
            PackAction::Repack
        } else {
            PackAction::Keep
        }
    }
}

/// Delete or repack packs whose blobs are no longer reachable from any
/// snapshot.
///
/// Requires the exclusive lock. Live blobs of sparsely used packs are
/// copied verbatim into new packs. A full index superseding every prior
/// index file is written before any obsolete pack is deleted. A pack that
/// is not in the index is only deleted when every blob in it is indexed in
/// another pack. With `dry_run` nothing is written or deleted.
pub fn prune(repo: &mut Repository, dry_run: bool) -> Result<PruneStats> {
    repo.require_lock(true)?;
    repo.flush()?;
    repo.load_index()?;

    let mut stats = PruneStats::default();
    let live = mark_reachable(repo, &mut stats)?;
    let index = Arc::clone(repo.index()?);
    for handle in &live {
        if !index.contains(handle) {
            return Err(ArcaError::IndexInconsistent(format!(
                "blob {handle} is referenced by a snapshot but not indexed"
            )));
        }
    }

    let usage = pack_usage(&index, &live);
    let threshold = repo.engine_config().packs.repack_threshold;
    let mut repack: Vec<PackId> = Vec::new();
    let mut obsolete: HashSet<PackId> = HashSet::new();
    for (pack_id, pack) in &usage {
        stats.blobs_live += pack.live.len();
        stats.blobs_unused += pack.total_blobs - pack.live.len();
        stats.unused_bytes += pack.total_bytes - pack.live_bytes;
        match pack.action(threshold) {
            PackAction::Keep => stats.packs_kept += 1,
            PackAction::Repack => {
                stats.packs_repacked += 1;
                stats.blobs_repacked += pack.live.len();
                stats.repacked_bytes += pack.live_bytes;
                repack.push(*pack_id);
                obsolete.insert(*pack_id);
            }
            PackAction::Delete => {
                stats.packs_deleted += 1;
                obsolete.insert(*pack_id);
            }
        }
    }
    repack.sort();

    for pack_id in redundant_packs(repo, &index)? {
        stats.packs_deleted += 1;
        obsolete.insert(pack_id);
    }

    info!(
        snapshots = stats.snapshots,
        live = stats.blobs_live,
        unused = stats.blobs_unused,
        keep = stats.packs_kept,
        repack = stats.packs_repacked,
        delete = stats.packs_deleted,
        dry_run,
        "prune plan"
    );
    if dry_run || obsolete.is_empty() {
        return Ok(stats);
    }

    for pack_id in &repack {
        let mut blobs = usage[pack_id].live.clone();
        blobs.sort_by_key(|(_, entry)| entry.offset);
        copy_live_blobs(repo, pack_id, &blobs)?;
    }
    repo.flush()?;

    // Repacked live blobs now point at their new packs; whatever still
    // points at an obsolete pack is unused.
    let current = Arc::clone(repo.index()?);
    let mut pruned = Index::new();
    for (handle, entry) in current.iter() {
        if !obsolete.contains(&entry.pack_id) {
            pruned.insert(*handle, *entry);
        } else if live.contains(handle) {
            return Err(ArcaError::IndexInconsistent(format!(
                "live blob {handle} still located in obsolete pack {}",
                entry.pack_id
            )));
        }
    }
    let previous = repo.loaded_index_files().to_vec();
    repo.install_full_index(pruned, &previous)?;

    let mut obsolete: Vec<PackId> = obsolete.into_iter().collect();
    obsolete.sort();
    delete_packs(repo, &obsolete)?;
    info!(
        deleted = stats.packs_deleted,
        repacked = stats.packs_repacked,
        "prune finished"
    );
    Ok(stats)
}

/// Delete packs one by one, stopping as soon as the exclusive lock is no
/// longer held.
pub(crate) fn delete_packs(repo: &Repository, packs: &[PackId]) -> Result<()> {
    for pack_id in packs {
        repo.require_lock(true)?;
        repo.storage()
            .delete(&pack_id.storage_key())
            .with_context(|| format!("deleting obsolete pack {pack_id}"))?;
        debug!(pack = %pack_id, "deleted pack");
    }
    Ok(())
}

/// Stored packs outside the index whose every blob is indexed in another
/// pack. Left behind when concurrent sessions upload the same content.
fn redundant_packs(repo: &Repository, index: &Index) -> Result<Vec<PackId>> {
    let mut redundant = Vec::new();
    for pack_id in list_packs(repo.storage().as_ref())? {
        if index.contains_pack(&pack_id) {
            continue;
        }
        let header = read_pack_header(repo.storage().as_ref(), &pack_id, repo.crypto().as_ref());
        let entries = match header {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() || e.is_integrity() => {
                warn!(pack = %pack_id, error = %e, "leaving unreadable unindexed pack in place");
                continue;
            }
            Err(e) => return Err(e.context(format!("reading header of pack {pack_id}"))),
        };
        let shadowed = !entries.is_empty()
            && entries.iter().all(|entry| {
                index
                    .get(&entry.handle())
                    .is_some_and(|located| located.pack_id != pack_id)
            });
        if shadowed {
            debug!(pack = %pack_id, blobs = entries.len(), "pack duplicates indexed content");
            redundant.push(pack_id);
        } else {
            debug!(pack = %pack_id, "keeping unindexed pack");
        }
    }
    Ok(redundant)
}

/// Every blob reachable from any snapshot: root trees, subtrees and file
/// content.
fn mark_reachable(repo: &mut Repository, stats: &mut PruneStats) -> Result<HashSet<BlobHandle>> {
    let snapshots = repo.list_snapshots(&SnapshotFilter::default())?;
    stats.snapshots = snapshots.len();

    let mut live = HashSet::new();
    for (id, snapshot) in snapshots {
        if !live.insert(BlobHandle::new(snapshot.tree, BlobType::Tree)) {
            continue;
        }
        walk(repo, &snapshot.tree, |_, node| {
            for chunk in &node.content {
                live.insert(BlobHandle::new(*chunk, BlobType::Data));
            }
            if let (NodeType::Dir, Some(subtree)) = (node.node_type, node.subtree) {
                if !live.insert(BlobHandle::new(subtree, BlobType::Tree)) {
                    return Ok(Visit::SkipSubtree);
                }
            }
            Ok(Visit::Continue)
        })
        .with_context(|| format!("walking snapshot {id}"))?;
    }
    Ok(live)
}

fn pack_usage(index: &Index, live: &HashSet<BlobHandle>) -> HashMap<PackId, PackUsage> {
    let mut usage: HashMap<PackId, PackUsage> = HashMap::new();
    for (handle, entry) in index.iter() {
        let pack = usage.entry(entry.pack_id).or_insert_with(|| PackUsage {
            live: Vec::new(),
            total_blobs: 0,
            total_bytes: 0,
            live_bytes: 0,
        });
        pack.total_blobs += 1;
        pack.total_bytes += u64::from(entry.length);
        if live.contains(handle) {
            pack.live.push((*handle, *entry));
            pack.live_bytes += u64::from(entry.length);
        }
    }
    usage
}

/// Verify each live blob of `pack_id` and buffer its stored bytes for a
/// new pack.
fn copy_live_blobs(
    repo: &mut Repository,
    pack_id: &PackId,
    blobs: &[(BlobHandle, IndexEntry)],
) -> Result<()> {
    debug!(pack = %pack_id, blobs = blobs.len(), "repacking");
    for (handle, entry) in blobs {
        let stored = read_blob_from_pack(
            repo.storage().as_ref(),
            pack_id,
            entry.offset,
            entry.length,
        )
        .with_context(|| format!("reading blob {handle} for repacking"))?;
        decode_blob(
            handle,
            &stored,
            Some(entry.uncompressed_length as usize),
            repo.crypto().as_ref(),
        )
        .with_context(|| format!("verifying blob {handle} in pack {pack_id}"))?;
        repo.buffer_stored_blob(*handle, &stored, entry.uncompressed_length)?;
    }
    Ok(())
}
