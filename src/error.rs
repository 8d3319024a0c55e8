//! Error taxonomy shared by the tree engine, the domain rules and the gateway

use crate::gateway::{Actor, Operation, Resource};
use crate::model::{InstanceId, InstanceKind, NodeId};
use crate::storage::StorageError;
use crate::tree::Position;
use thiserror::Error;

/// The specific structural or domain rule a rejected request violated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("nothing may be placed beside the root of a tree")]
    SiblingOfRoot,

    #[error("the root of a tree is created with its owner and never placed or moved")]
    RootIsFixed,

    #[error("a node cannot be placed relative to itself or one of its descendants")]
    Cycle,

    #[error("nodes from different trees cannot be positioned relative to each other")]
    CrossOwner,

    #[error("{parent_type} nodes cannot have children")]
    LeafParent { parent_type: &'static str },

    #[error("position {position} is not valid for {action}")]
    PositionMismatch {
        action: &'static str,
        position: Position,
    },

    #[error("{child} is not permitted under {parent}")]
    Grammar {
        parent: &'static str,
        child: &'static str,
    },

    #[error("beats must lie strictly between the hook and the resolution")]
    OutsideMilestones,

    #[error("beats may not leave the milestone segment they belong to")]
    SegmentChange,

    #[error("only beats can be added to an arc after creation, not {requested}")]
    BeatOnly { requested: &'static str },

    #[error("unknown {tree} node type '{name}'")]
    UnknownType { tree: &'static str, name: String },

    #[error("instance {instance} belongs to a different outline")]
    CrossOutline { instance: InstanceId },

    #[error("instance {instance} is not a {expected} instance")]
    WrongInstanceKind {
        instance: InstanceId,
        expected: InstanceKind,
    },

    #[error("story node {node} is not part of this outline")]
    ForeignStoryNode { node: NodeId },

    #[error("story nodes cannot link to other story nodes")]
    StoryLinkOnStoryNode,

    #[error("a title cannot be blank")]
    BlankTitle,
}

/// Errors surfaced by outline operations
#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{actor} is not authorized to {operation} {resource}")]
    Unauthorized {
        actor: Actor,
        operation: Operation,
        resource: Resource,
    },

    #[error("invalid placement: {0}")]
    InvalidPlacement(Violation),

    #[error("illegal move: {0}")]
    IllegalMove(Violation),

    #[error("node {id} is protected: {reason}")]
    ProtectedNode { id: NodeId, reason: &'static str },

    #[error("validation failed: {0}")]
    Validation(Violation),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(#[source] StorageError),

    #[error("storage failure: {0}")]
    StorageFailure(#[source] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl OutlineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Only conflicts with a concurrent writer are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

impl From<StorageError> for OutlineError {
    fn from(err: StorageError) -> Self {
        if err.is_conflict() {
            Self::ConcurrentModification(err)
        } else {
            Self::StorageFailure(err)
        }
    }
}

/// Result type for outline operations
pub type OutlineResult<T> = Result<T, OutlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_maps_to_concurrent_modification() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = OutlineError::from(StorageError::Database(busy));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_storage_errors_are_fatal() {
        let err = OutlineError::from(StorageError::Corrupt("bad path".into()));
        assert!(matches!(err, OutlineError::StorageFailure(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_violation_messages_name_the_rule() {
        let v = Violation::Grammar {
            parent: "chapter",
            child: "part",
        };
        assert_eq!(v.to_string(), "part is not permitted under chapter");
        let err = OutlineError::InvalidPlacement(v);
        assert!(err.to_string().starts_with("invalid placement"));
    }
}
