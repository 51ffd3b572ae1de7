use rayon::prelude::*;
use tracing::{info, warn};

use arca_crypto::CryptoEngine;
use arca_storage::StorageBackend;
use arca_storage::paths::PACKS_DIR;
use arca_types::PackId;
use arca_types::error::Result;

use super::Index;
use crate::repo::pack::read_pack_header;

/// Outcome of rebuilding the index from pack headers.
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub index: Index,
    pub packs_scanned: usize,
    /// Packs whose header failed authentication or parsing. Never deleted
    /// by the rebuild; an operator decides what to do with them.
    pub unreadable: Vec<(PackId, String)>,
}

/// Every pack stored in the backend, sorted by ID. Keys that do not parse
/// as pack names are skipped with a warning.
pub fn list_packs(storage: &dyn StorageBackend) -> Result<Vec<PackId>> {
    let mut packs: Vec<PackId> = storage
        .list(PACKS_DIR)?
        .iter()
        .filter_map(|key| match PackId::from_storage_key(key) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring foreign object in packs directory");
                None
            }
        })
        .collect();
    packs.sort();
    Ok(packs)
}

/// Rebuild the index by reading the header of every pack.
///
/// Headers are fetched in parallel and merged in pack ID order into a fresh
/// index. Packs that vanish during the scan are skipped; packs that fail
/// integrity checks are reported. Any other failure (e.g. exhausted
/// retries) aborts the rebuild.
pub fn rebuild_index(
    storage: &dyn StorageBackend,
    crypto: &dyn CryptoEngine,
) -> Result<RebuildReport> {
    let packs = list_packs(storage)?;
    let headers: Vec<_> = packs
        .par_iter()
        .map(|pack_id| (*pack_id, read_pack_header(storage, pack_id, crypto)))
        .collect();

    let mut report = RebuildReport {
        packs_scanned: packs.len(),
        ..RebuildReport::default()
    };
    for (pack_id, header) in headers {
        match header {
            Ok(entries) => report.index.add_pack(pack_id, &entries),
            Err(e) if e.is_not_found() => {
                warn!(pack = %pack_id, "pack vanished during index rebuild");
            }
            Err(e) if e.is_integrity() => {
                warn!(pack = %pack_id, error = %e, "unreadable pack header");
                report.unreadable.push((pack_id, e.to_string()));
            }
            Err(e) => return Err(e.context(format!("reading header of pack {pack_id}"))),
        }
    }
    info!(
        packs = report.packs_scanned,
        blobs = report.index.len(),
        unreadable = report.unreadable.len(),
        "rebuilt index from pack headers"
    );
    Ok(report)
}
