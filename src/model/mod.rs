//! Outline-level entities and identifiers

mod ids;
mod owner;

pub use ids::{ArcId, InstanceId, NodeId, OutlineId};
pub use owner::{Instance, InstanceKind, MaceType, Outline, OwnerRef, StoryArc, TreeKind};
