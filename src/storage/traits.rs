//! Storage trait definitions

use crate::model::{ArcId, Instance, InstanceId, NodeId, Outline, OutlineId, OwnerRef, StoryArc};
use crate::tree::NodePayload;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Connection lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Another writer holds the database
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Lost a race with another writer: the database was busy, or a node
    /// landed on a path someone else took between read and commit
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                self.is_busy() || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A tree node as stored, with its type kept as the stored name
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub owner: OwnerRef,
    pub outline_id: OutlineId,
    pub node_type: String,
    pub path: String,
    pub depth: usize,
    pub payload: NodePayload,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One step of a unit of work passed to [`TreeStore::apply`]
#[derive(Debug, Clone)]
pub enum Mutation {
    SaveOutline(Outline),
    SaveArc(StoryArc),
    SaveInstance(Instance),
    /// Removes the outline with its arcs, trees and instances
    DeleteOutline(OutlineId),
    /// Removes the arc with its whole beat tree
    DeleteArc(ArcId),
    InsertNode(NodeRecord),
    /// Rewrites type and payload of an existing node; its path is untouched
    UpdateNode(NodeRecord),
    /// Prefix substitution over the subtree rooted at `from`
    Relocate {
        owner: OwnerRef,
        from: String,
        to: String,
        depth_delta: i64,
    },
    /// Removes the node at `path` and every descendant
    DeleteSubtree { owner: OwnerRef, path: String },
}

/// Trait for outline storage backends
///
/// Implementations must be thread-safe (Send + Sync). Every call to `apply`
/// is one atomic unit: either all mutations commit or none do. Reads must
/// observe committed state only, apart from a thread's reads inside its own
/// exclusive section.
pub trait TreeStore: Send + Sync {
    // === Owner Operations ===

    fn load_outline(&self, id: &OutlineId) -> StorageResult<Option<Outline>>;

    fn list_outlines(&self) -> StorageResult<Vec<Outline>>;

    fn load_arc(&self, id: &ArcId) -> StorageResult<Option<StoryArc>>;

    /// Arcs of an outline, oldest first
    fn list_arcs(&self, outline_id: &OutlineId) -> StorageResult<Vec<StoryArc>>;

    fn load_instance(&self, id: &InstanceId) -> StorageResult<Option<Instance>>;

    fn list_instances(&self, outline_id: &OutlineId) -> StorageResult<Vec<Instance>>;

    // === Node Operations ===

    fn load_node(&self, id: &NodeId) -> StorageResult<Option<NodeRecord>>;

    /// The node at an exact path in an owner's tree
    fn load_node_at(&self, owner: &OwnerRef, path: &str) -> StorageResult<Option<NodeRecord>>;

    /// Nodes at any of the given paths, in path order
    fn load_nodes_at(&self, owner: &OwnerRef, paths: &[String]) -> StorageResult<Vec<NodeRecord>>;

    /// Children of the node at `parent_path` in path order; `None` lists the root level
    fn load_children(&self, owner: &OwnerRef, parent_path: Option<&str>)
        -> StorageResult<Vec<NodeRecord>>;

    /// The node at `path` followed by all its descendants, in path order
    fn load_subtree(&self, owner: &OwnerRef, path: &str) -> StorageResult<Vec<NodeRecord>>;

    // === Unit of Work ===

    /// Apply all mutations atomically
    fn apply(&self, mutations: &[Mutation]) -> StorageResult<()>;

    /// Run `work` as one serializable unit of work.
    ///
    /// Every read and `apply` that `work` makes on this store from the same
    /// thread joins a single write transaction; other writers, in this
    /// process or another, wait until it ends. `work` returns whether to
    /// commit. A conflict taking the write lock surfaces as an error for
    /// which `is_conflict` holds.
    fn exclusive(&self, work: &mut dyn FnMut() -> bool) -> StorageResult<()>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: TreeStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
