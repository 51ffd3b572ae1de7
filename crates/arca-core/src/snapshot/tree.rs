use serde::{Deserialize, Serialize};

use arca_types::error::{ArcaError, Result};
use arca_types::{BlobId, BlobType};

use crate::repo::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Dir,
    Symlink,
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub node_type: NodeType,
    pub mode: u32,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub size: u64,
    /// For files: the data blobs making up the content, in order.
    #[serde(default)]
    pub content: Vec<BlobId>,
    /// For directories: the tree blob holding the children.
    #[serde(default)]
    pub subtree: Option<BlobId>,
    #[serde(default)]
    pub link_target: Option<String>,
}

impl Node {
    pub fn file(name: impl Into<String>, size: u64, content: Vec<BlobId>) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::File,
            mode: 0o644,
            mtime: 0,
            size,
            content,
            subtree: None,
            link_target: None,
        }
    }

    pub fn dir(name: impl Into<String>, subtree: BlobId) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::Dir,
            mode: 0o755,
            mtime: 0,
            size: 0,
            content: Vec::new(),
            subtree: Some(subtree),
            link_target: None,
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::Symlink,
            mode: 0o777,
            mtime: 0,
            size: 0,
            content: Vec::new(),
            subtree: None,
            link_target: Some(target.into()),
        }
    }
}

/// The entries of one directory, sorted by name. Identical directories
/// serialize to identical bytes and therefore share one tree blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Build a tree from nodes in any order. Duplicate names are rejected.
    pub fn new(mut nodes: Vec<Node>) -> Result<Self> {
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = nodes.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(ArcaError::Other(format!(
                "duplicate tree entry '{}'",
                pair[0].name
            )));
        }
        Ok(Self { nodes })
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.nodes[i])
    }
}

impl Repository {
    /// Store a tree as a tree blob. Returns its ID.
    pub fn save_tree(&mut self, tree: &Tree) -> Result<BlobId> {
        let bytes = rmp_serde::to_vec_named(tree)?;
        let (id, _) = self.write_blob(BlobType::Tree, &bytes)?;
        Ok(id)
    }

    pub fn load_tree(&mut self, id: &BlobId) -> Result<Tree> {
        let bytes = self.read_blob(BlobType::Tree, id)?;
        let tree: Tree = rmp_serde::from_slice(&bytes)?;
        Ok(tree)
    }
}
