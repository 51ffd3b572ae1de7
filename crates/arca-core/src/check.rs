//! Consistency check between the loaded index and the packs in the backend.

use std::collections::HashSet;

use tracing::{info, warn};

use arca_storage::StorageBackend;
use arca_types::PackId;
use arca_types::error::Result;

use crate::index::{Index, list_packs};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexCheckReport {
    /// Referenced by the index but absent from the backend.
    pub missing_packs: Vec<PackId>,
    /// Present in the backend but not referenced by the index. Left by an
    /// interrupted session (`rebuild_index` picks them up) or by concurrent
    /// sessions storing the same content (`prune` deletes those).
    pub unindexed_packs: Vec<PackId>,
}

impl IndexCheckReport {
    pub fn is_clean(&self) -> bool {
        self.missing_packs.is_empty() && self.unindexed_packs.is_empty()
    }
}

pub fn check_index(storage: &dyn StorageBackend, index: &Index) -> Result<IndexCheckReport> {
    let stored: HashSet<PackId> = list_packs(storage)?.into_iter().collect();

    let mut missing_packs: Vec<PackId> = index
        .packs()
        .filter(|id| !stored.contains(id))
        .copied()
        .collect();
    missing_packs.sort();

    let mut unindexed_packs: Vec<PackId> = stored
        .iter()
        .filter(|id| !index.contains_pack(id))
        .copied()
        .collect();
    unindexed_packs.sort();

    for pack in &missing_packs {
        warn!(pack = %pack, "indexed pack is missing from storage");
    }
    info!(
        missing = missing_packs.len(),
        unindexed = unindexed_packs.len(),
        "index check finished"
    );
    Ok(IndexCheckReport {
        missing_packs,
        unindexed_packs,
    })
}
