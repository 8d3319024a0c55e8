//! Authorization oracle consulted before every operation

use crate::model::{ArcId, OutlineId, OwnerRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whoever issues a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// What the actor wants to do, decided by the caller up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    View,
    Create,
    Edit,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        })
    }
}

/// The object an operation is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Outline(OutlineId),
    Arc { arc: ArcId, outline: OutlineId },
}

impl Resource {
    /// The resource guarding a tree; nodes are checked against their tree's owner
    pub fn of_owner(owner: &OwnerRef, outline: OutlineId) -> Self {
        match owner {
            OwnerRef::Arc(arc) => Self::Arc { arc: *arc, outline },
            OwnerRef::Outline(id) => Self::Outline(*id),
        }
    }

    pub fn outline_id(&self) -> OutlineId {
        match self {
            Self::Outline(id) => *id,
            Self::Arc { outline, .. } => *outline,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outline(id) => write!(f, "outline {}", id),
            Self::Arc { arc, outline } => write!(f, "arc {} of outline {}", arc, outline),
        }
    }
}

/// `is_authorized(actor, operation, resource)`; a `false` stops the request
/// before anything is read beyond the resource itself
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, actor: &Actor, operation: Operation, resource: &Resource) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&Actor, Operation, &Resource) -> bool + Send + Sync,
{
    fn is_authorized(&self, actor: &Actor, operation: Operation, resource: &Resource) -> bool {
        self(actor, operation, resource)
    }
}

/// Grants everything; for local single-user use
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_authorized(&self, _: &Actor, _: Operation, _: &Resource) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closures_are_authorizers() {
        let read_only = |_: &Actor, op: Operation, _: &Resource| op == Operation::View;
        let resource = Resource::Outline(OutlineId::new());
        let actor = Actor::new("reader");

        assert!(read_only.is_authorized(&actor, Operation::View, &resource));
        assert!(!read_only.is_authorized(&actor, Operation::Edit, &resource));
        assert!(AllowAll.is_authorized(&actor, Operation::Delete, &resource));
    }

    #[test]
    fn test_arc_resource_carries_its_outline() {
        let outline = OutlineId::new();
        let arc = ArcId::new();
        let resource = Resource::of_owner(&OwnerRef::Arc(arc), outline);
        assert_eq!(resource, Resource::Arc { arc, outline });
        assert_eq!(resource.outline_id(), outline);
        assert_eq!(
            Resource::of_owner(&OwnerRef::Outline(outline), outline),
            Resource::Outline(outline)
        );
    }
}
