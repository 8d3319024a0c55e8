//! Tree nodes, node kinds and placement positions

use super::path::MaterializedPath;
use crate::model::{InstanceId, NodeId, OutlineId, OwnerRef, TreeKind};
use crate::storage::{NodeRecord, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Closed enumeration of node types for one tree kind
pub trait NodeKind:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// The tree kind these types belong to
    const TREE: TreeKind;

    /// Type of the synthetic root every tree starts with
    const ROOT: Self;

    /// Every type, in declaration order
    fn all() -> &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.as_str() == name)
    }

    fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    /// Structurally mandatory nodes: never deleted, moved or retyped
    fn is_sentinel(&self) -> bool {
        self.is_root()
    }

    /// Whether nodes of this type may have children at all
    fn accepts_children(&self) -> bool {
        true
    }
}

/// Where a node goes relative to an anchor node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    FirstChild,
    LastChild,
    FirstSibling,
    LastSibling,
    Left,
    Right,
}

impl Position {
    pub const ALL: [Position; 6] = [
        Self::FirstChild,
        Self::LastChild,
        Self::FirstSibling,
        Self::LastSibling,
        Self::Left,
        Self::Right,
    ];

    /// Whether the anchor becomes the parent
    pub fn is_child(&self) -> bool {
        matches!(self, Self::FirstChild | Self::LastChild)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstChild => "first-child",
            Self::LastChild => "last-child",
            Self::FirstSibling => "first-sibling",
            Self::LastSibling => "last-sibling",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown position '{}'", s))
    }
}

/// Free content carried by a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePayload {
    /// Headline of an arc node, name of a story node
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub characters: BTreeSet<InstanceId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub locations: BTreeSet<InstanceId>,
    /// Story node an arc node is realized in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_node: Option<NodeId>,
}

impl NodePayload {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_character(mut self, instance: InstanceId) -> Self {
        self.characters.insert(instance);
        self
    }

    pub fn with_location(mut self, instance: InstanceId) -> Self {
        self.locations.insert(instance);
        self
    }
}

/// A node of a tree whose types are `K`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode<K> {
    pub id: NodeId,
    pub owner: OwnerRef,
    /// Outline scope for associations; for arc nodes the arc's outline
    pub outline_id: OutlineId,
    pub node_type: K,
    pub path: MaterializedPath,
    /// Cached `path.depth()`
    pub depth: usize,
    pub payload: NodePayload,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl<K: NodeKind> TreeNode<K> {
    /// A node that does not exist in storage yet
    pub fn new(
        owner: OwnerRef,
        outline_id: OutlineId,
        node_type: K,
        path: MaterializedPath,
        payload: NodePayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            owner,
            outline_id,
            node_type,
            depth: path.depth(),
            path,
            payload,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.node_type.is_root()
    }

    pub fn is_sentinel(&self) -> bool {
        self.node_type.is_sentinel()
    }

    /// Decode a stored row, checking it belongs to this tree kind
    pub fn from_record(record: NodeRecord) -> Result<Self, StorageError> {
        if record.owner.tree_kind() != K::TREE {
            return Err(StorageError::Corrupt(format!(
                "node {} belongs to a {} tree, expected {}",
                record.id,
                record.owner.tree_kind(),
                K::TREE
            )));
        }
        let node_type = K::parse(&record.node_type).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "node {} has unknown {} type '{}'",
                record.id,
                K::TREE,
                record.node_type
            ))
        })?;
        let path = MaterializedPath::parse(&record.path)
            .map_err(|e| StorageError::Corrupt(format!("node {}: {}", record.id, e)))?;
        if path.depth() != record.depth {
            return Err(StorageError::Corrupt(format!(
                "node {} has depth {} but path {}",
                record.id, record.depth, path
            )));
        }
        Ok(Self {
            id: record.id,
            owner: record.owner,
            outline_id: record.outline_id,
            node_type,
            depth: record.depth,
            path,
            payload: record.payload,
            created_at: record.created_at,
            modified_at: record.modified_at,
        })
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id,
            owner: self.owner,
            outline_id: self.outline_id,
            node_type: self.node_type.as_str().to_string(),
            path: self.path.as_str().to_string(),
            depth: self.depth,
            payload: self.payload.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}
