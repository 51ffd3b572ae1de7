//! Depth-first traversal of snapshot trees.

use arca_types::BlobId;
use arca_types::error::Result;

use super::Snapshot;
use super::tree::{Node, NodeType};
use crate::repo::Repository;

/// What the walker does after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Do not descend into this directory node.
    SkipSubtree,
}

/// Visit every node below `tree_id` in name order, parents before their
/// children. Node paths are absolute: `/etc`, `/etc/hosts`.
pub fn walk<F>(repo: &mut Repository, tree_id: &BlobId, mut visitor: F) -> Result<()>
where
    F: FnMut(&str, &Node) -> Result<Visit>,
{
    walk_tree(repo, tree_id, "", &mut visitor)
}

fn walk_tree<F>(repo: &mut Repository, tree_id: &BlobId, prefix: &str, visitor: &mut F) -> Result<()>
where
    F: FnMut(&str, &Node) -> Result<Visit>,
{
    let tree = repo.load_tree(tree_id)?;
    for node in &tree.nodes {
        let nodepath = format!("{prefix}/{}", node.name);
        let visit = visitor(&nodepath, node)?;
        if visit == Visit::SkipSubtree || node.node_type != NodeType::Dir {
            continue;
        }
        if let Some(subtree) = &node.subtree {
            walk_tree(repo, subtree, &nodepath, visitor)?;
        }
    }
    Ok(())
}

/// List the nodes of a snapshot, optionally restricted to `dirs`.
///
/// Without `recursive` a node is listed when its parent directory is one of
/// `dirs`; with it, when it lies anywhere below one of them (the directory
/// itself included). Subtrees that cannot contain a match are not loaded.
pub fn list_nodes(
    repo: &mut Repository,
    snapshot: &Snapshot,
    dirs: &[String],
    recursive: bool,
) -> Result<Vec<(String, Node)>> {
    let dirs: Vec<&str> = dirs.iter().map(|d| normalize_dir(d)).collect();
    let mut listed = Vec::new();
    walk(repo, &snapshot.tree, |nodepath, node| {
        if dirs.is_empty() {
            listed.push((nodepath.to_string(), node.clone()));
            return Ok(Visit::Continue);
        }

        let matched = dirs.iter().any(|dir| {
            if recursive {
                is_within(nodepath, dir)
            } else {
                parent_dir(nodepath) == *dir
            }
        });
        if matched {
            listed.push((nodepath.to_string(), node.clone()));
        }

        let descend = dirs
            .iter()
            .any(|dir| is_within(dir, nodepath) || (recursive && is_within(nodepath, dir)));
        Ok(if descend {
            Visit::Continue
        } else {
            Visit::SkipSubtree
        })
    })?;
    Ok(listed)
}

fn normalize_dir(dir: &str) -> &str {
    match dir.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Whether `path` is `dir` or lies below it.
fn is_within(path: &str, dir: &str) -> bool {
    dir == "/"
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_top_level_is_root() {
        assert_eq!(parent_dir("/etc"), "/");
        assert_eq!(parent_dir("/etc/hosts"), "/etc");
        assert_eq!(parent_dir("/a/b/c"), "/a/b");
    }

    #[test]
    fn is_within_respects_component_boundaries() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(is_within("/anything", "/"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/a", "/a/b"));
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize_dir("/a/"), "/a");
        assert_eq!(normalize_dir("/"), "/");
        assert_eq!(normalize_dir("//"), "/");
    }
}
