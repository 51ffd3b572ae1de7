pub mod tree;
pub mod walker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use arca_storage::paths::{SNAPSHOTS_DIR, object_name};
use arca_types::error::{ArcaError, Result, ResultExt};
use arca_types::{BlobHandle, BlobId, BlobType, SnapshotId};

use crate::platform;
use crate::repo::Repository;
use crate::repo::format::{ObjectType, pack_object, unpack_object_expect};

pub use tree::{Node, NodeType, Tree};
pub use walker::{Visit, list_nodes, walk};

/// Metadata for a single snapshot, stored at `snapshots/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
    /// Source paths that were backed up.
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Root tree blob.
    pub tree: BlobId,
    #[serde(default)]
    pub parent: Option<SnapshotId>,
}

impl Snapshot {
    /// A snapshot of `paths` taken now by the current host and user.
    pub fn new(paths: Vec<String>, tree: BlobId) -> Self {
        Self {
            time: Utc::now(),
            hostname: platform::hostname(),
            username: platform::username(),
            paths,
            tags: Vec::new(),
            tree,
            parent: None,
        }
    }

    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    pub fn has_paths(&self, paths: &[String]) -> bool {
        paths.iter().all(|p| self.paths.contains(p))
    }
}

/// Selects snapshots by host, tags and paths. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Any of these hosts.
    pub hosts: Vec<String>,
    /// All of these tags.
    pub tags: Vec<String>,
    /// All of these paths.
    pub paths: Vec<String>,
}

impl SnapshotFilter {
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        (self.hosts.is_empty() || self.hosts.contains(&snapshot.hostname))
            && snapshot.has_tags(&self.tags)
            && snapshot.has_paths(&self.paths)
    }
}

impl Repository {
    /// Persist a snapshot. Open packs are flushed first so the snapshot
    /// never references blobs that are not durably stored and indexed.
    pub fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<SnapshotId> {
        self.require_lock(false)?;
        self.flush()?;
        let root = BlobHandle::new(snapshot.tree, BlobType::Tree);
        if !self.index()?.contains(&root) {
            return Err(ArcaError::BlobNotFound(root));
        }

        let id = SnapshotId::generate();
        let payload = rmp_serde::to_vec_named(snapshot)?;
        let object = pack_object(
            ObjectType::Snapshot,
            id.as_bytes(),
            &payload,
            self.crypto().as_ref(),
        )?;
        self.storage().put(&id.storage_key(), &object)?;
        info!(snapshot = %id, tree = %snapshot.tree, "saved snapshot");
        Ok(id)
    }

    pub fn load_snapshot(&self, id: &SnapshotId) -> Result<Snapshot> {
        let key = id.storage_key();
        let data = self
            .storage()
            .get(&key)?
            .ok_or_else(|| ArcaError::SnapshotNotFound(id.to_hex()))?;
        let payload = unpack_object_expect(
            &data,
            ObjectType::Snapshot,
            id.as_bytes(),
            self.crypto().as_ref(),
        )
        .with_context(|| format!("decrypting snapshot {id}"))?;
        Ok(rmp_serde::from_slice(&payload)?)
    }

    /// IDs of every stored snapshot, sorted.
    pub fn list_snapshot_ids(&self) -> Result<Vec<SnapshotId>> {
        let mut ids = Vec::new();
        for key in self.storage().list(SNAPSHOTS_DIR)? {
            match SnapshotId::from_hex(object_name(&key)) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(key = %key, error = %e, "ignoring foreign object in snapshots directory"),
            }
        }
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }

    /// Every snapshot matching `filter`, oldest first. Snapshots deleted
    /// while listing are skipped.
    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<(SnapshotId, Snapshot)>> {
        let mut snapshots = Vec::new();
        for id in self.list_snapshot_ids()? {
            match self.load_snapshot(&id) {
                Ok(snapshot) if filter.matches(&snapshot) => snapshots.push((id, snapshot)),
                Ok(_) => {}
                Err(ArcaError::SnapshotNotFound(_)) => {
                    debug!(snapshot = %id, "snapshot vanished while listing");
                }
                Err(e) => return Err(e),
            }
        }
        snapshots.sort_by(|a, b| a.1.time.cmp(&b.1.time).then_with(|| a.0.0.cmp(&b.0.0)));
        Ok(snapshots)
    }

    /// Resolve `"latest"` (newest snapshot matching `filter`) or a unique
    /// hex prefix of a snapshot ID. The filter does not apply to prefixes.
    pub fn find_snapshot(
        &self,
        name: &str,
        filter: &SnapshotFilter,
    ) -> Result<(SnapshotId, Snapshot)> {
        if name == "latest" {
            return self
                .list_snapshots(filter)?
                .pop()
                .ok_or_else(|| ArcaError::SnapshotNotFound(name.into()));
        }

        let prefix = name.to_ascii_lowercase();
        let candidates: Vec<SnapshotId> = self
            .list_snapshot_ids()?
            .into_iter()
            .filter(|id| !prefix.is_empty() && id.to_hex().starts_with(&prefix))
            .collect();
        let id = match candidates.as_slice() {
            [id] => *id,
            [] => return Err(ArcaError::SnapshotNotFound(name.into())),
            many => {
                return Err(ArcaError::Other(format!(
                    "snapshot prefix '{name}' is ambiguous ({} matches)",
                    many.len()
                )));
            }
        };
        let snapshot = self.load_snapshot(&id)?;
        Ok((id, snapshot))
    }

    /// Remove a snapshot. Its blobs stay in storage until the next prune.
    pub fn delete_snapshot(&mut self, id: &SnapshotId) -> Result<()> {
        self.require_lock(true)?;
        let key = id.storage_key();
        if !self.storage().exists(&key)? {
            return Err(ArcaError::SnapshotNotFound(id.to_hex()));
        }
        self.storage().delete(&key)?;
        info!(snapshot = %id, "deleted snapshot");
        Ok(())
    }
}
