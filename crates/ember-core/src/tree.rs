//! In-memory mirror of the remote object tree.
//!
//! Nodes live in an arena keyed by their full path chain, so parent
//! lookups are map probes rather than owning back-references. Contents
//! are populated lazily by the session's directory fetches; connection
//! state is only as fresh as the last fetch or connect acknowledgment.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use crate::protocol::{ChildEntry, ElementKind};

/// A node in the remote device's object hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Full dotted path from the device root.
    pub path: Vec<u32>,
    pub kind: ElementKind,
    pub identifier: Option<String>,
    /// Present only for matrices.
    pub matrix: Option<MatrixState>,
}

impl TreeNode {
    /// Last path segment (the node's number under its parent).
    pub fn number(&self) -> u32 {
        *self.path.last().unwrap_or(&0)
    }
}

/// Matrix dimensions plus the mirrored connection map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixState {
    pub target_count: u32,
    pub source_count: u32,
    /// target index -> currently connected source indices.
    pub connections: BTreeMap<u32, BTreeSet<u32>>,
}

/// Arena of known tree nodes. The empty path is the implicit root and
/// always resolves.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: HashMap<Vec<u32>, TreeNode>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node by full path. The empty path is not stored, so use
    /// `contains` for existence checks that may include the root.
    pub fn get(&self, path: &[u32]) -> Option<&TreeNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &[u32]) -> bool {
        path.is_empty() || self.nodes.contains_key(path)
    }

    /// All known children of `path`, ordered by segment number.
    pub fn children(&self, path: &[u32]) -> Vec<&TreeNode> {
        let mut children: Vec<&TreeNode> = self
            .nodes
            .values()
            .filter(|n| n.path.len() == path.len() + 1 && n.path.starts_with(path))
            .collect();
        children.sort_by_key(|n| n.number());
        children
    }

    /// Find a direct child of `path` by its identifier string.
    pub fn child_by_identifier(&self, path: &[u32], identifier: &str) -> Option<&TreeNode> {
        self.children(path)
            .into_iter()
            .find(|n| n.identifier.as_deref() == Some(identifier))
    }

    /// Merge a directory listing for `parent` into the arena.
    ///
    /// Idempotent: merging the same listing twice leaves the tree equal
    /// to merging it once. Known matrix connection state survives a
    /// re-merge; counts and identifiers are refreshed.
    pub fn merge_children(&mut self, parent: &[u32], children: &[ChildEntry]) {
        for entry in children {
            let mut path = parent.to_vec();
            path.push(entry.number);

            let node = self.nodes.entry(path.clone()).or_insert_with(|| TreeNode {
                path,
                kind: entry.kind,
                identifier: None,
                matrix: None,
            });

            node.kind = entry.kind;
            if entry.identifier.is_some() {
                node.identifier = entry.identifier.clone();
            }
            if let Some(info) = entry.matrix {
                let state = node.matrix.get_or_insert_with(MatrixState::default);
                state.target_count = info.target_count;
                state.source_count = info.source_count;
            }
        }
    }

    /// Record the source set for one matrix target.
    ///
    /// Updates for paths never fetched are dropped: nothing upstream
    /// cares about targets it did not ask for.
    pub fn apply_connection(&mut self, matrix_path: &[u32], target: u32, sources: &[u32]) {
        let Some(node) = self.nodes.get_mut(matrix_path) else {
            trace!(path = ?matrix_path, "Connection update for unknown node dropped");
            return;
        };
        if node.kind != ElementKind::Matrix {
            trace!(path = ?matrix_path, "Connection update for non-matrix node dropped");
            return;
        }
        let state = node.matrix.get_or_insert_with(MatrixState::default);
        state
            .connections
            .insert(target, sources.iter().copied().collect());
    }

    /// Connection map of the matrix at `path`, if cached.
    pub fn connections(&self, path: &[u32]) -> Option<&BTreeMap<u32, BTreeSet<u32>>> {
        self.nodes
            .get(path)
            .and_then(|n| n.matrix.as_ref())
            .map(|m| &m.connections)
    }

    /// Number of cached nodes (root excluded).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
