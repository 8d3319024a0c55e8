//! Annotated lists: a subtree flattened in preorder with relative depths

use super::node::{NodeKind, TreeNode};
use serde::Serialize;

/// One entry of an annotated list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedEntry<K> {
    pub node: TreeNode<K>,
    /// Levels below the first entry's level
    pub depth: usize,
}

/// Preorder `(node, relative_depth)` sequence of a subtree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnnotatedList<K> {
    entries: Vec<AnnotatedEntry<K>>,
}

impl<K: NodeKind> AnnotatedList<K> {
    /// Build from nodes already sorted by path, all lying under `nodes[0]`
    pub(crate) fn from_preorder(nodes: Vec<TreeNode<K>>) -> Self {
        let base = nodes.first().map(|n| n.depth).unwrap_or(0);
        let entries = nodes
            .into_iter()
            .map(|node| AnnotatedEntry {
                depth: node.depth - base,
                node,
            })
            .collect();
        Self { entries }
    }

    /// Drop the first entry (the subtree's own top node) and lift the rest one level
    pub fn without_top(mut self) -> Self {
        if !self.entries.is_empty() {
            self.entries.remove(0);
        }
        for entry in &mut self.entries {
            entry.depth = entry.depth.saturating_sub(1);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotatedEntry<K>> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&AnnotatedEntry<K>> {
        self.entries.get(index)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode<K>> {
        self.entries.iter().map(|e| &e.node)
    }

    pub fn types(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.node.node_type).collect()
    }

    pub fn depths(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.depth).collect()
    }

    /// Entry holding the node with this id
    pub fn find(&self, id: &crate::model::NodeId) -> Option<&AnnotatedEntry<K>> {
        self.entries.iter().find(|e| &e.node.id == id)
    }

    /// Depth never jumps by more than one level when descending
    pub fn is_depth_continuous(&self) -> bool {
        self.entries.first().map_or(true, |e| e.depth == 0)
            && self.entries.windows(2).all(|w| w[1].depth <= w[0].depth + 1)
    }
}

impl<K> IntoIterator for AnnotatedList<K> {
    type Item = AnnotatedEntry<K>;
    type IntoIter = std::vec::IntoIter<AnnotatedEntry<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a, K> IntoIterator for &'a AnnotatedList<K> {
    type Item = &'a AnnotatedEntry<K>;
    type IntoIter = std::slice::Iter<'a, AnnotatedEntry<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
