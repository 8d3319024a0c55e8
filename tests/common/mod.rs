//! Common fixtures for the outline integration tests
//!
//! Each test gets its own gateway over a fresh in-memory store, or a
//! file-backed store in a temporary directory when several connections
//! need to share the same database.

#![allow(dead_code)]

use fiction_outlines::{
    Actor, AllowAll, AnyNode, ArcElementType, ArcId, InsertAction, MaceType, NewNode, NodeId,
    NodeMutationGateway, NodePayload, OpenStore, Outline, OutlineConfig, OutlineId, OwnerRef,
    Position, SqliteStore, StoryArc, StoryElementType, TreeNode, TreeRules,
};
use std::path::Path;
use std::sync::Arc;

pub fn author() -> Actor {
    Actor::new("author")
}

pub fn gateway() -> NodeMutationGateway {
    gateway_with(OutlineConfig::default())
}

pub fn gateway_with(config: OutlineConfig) -> NodeMutationGateway {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    NodeMutationGateway::new(Arc::new(store), Arc::new(AllowAll), &config).expect("gateway")
}

/// A gateway with its own connection to the database file at `path`
pub fn file_gateway(path: &Path, config: &OutlineConfig) -> NodeMutationGateway {
    let store = SqliteStore::open(path).expect("file store");
    NodeMutationGateway::new(Arc::new(store), Arc::new(AllowAll), config).expect("gateway")
}

/// An outline with one character arc
pub struct Fixture {
    pub gateway: NodeMutationGateway,
    pub actor: Actor,
    pub outline: Outline,
    pub arc: StoryArc,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_gateway(gateway())
    }

    pub fn with_gateway(gateway: NodeMutationGateway) -> Self {
        let actor = author();
        let outline = gateway
            .create_outline(&actor, "The Long Night", None)
            .expect("outline");
        let arc = gateway
            .create_arc(&actor, &outline.id, "Coming of age", MaceType::Character)
            .expect("arc");
        Self {
            gateway,
            actor,
            outline,
            arc,
        }
    }

    pub fn story_root(&self) -> TreeNode<StoryElementType> {
        self.gateway
            .stories()
            .tree()
            .root(&OwnerRef::Outline(self.outline.id))
            .expect("story root")
    }

    pub fn arc_root(&self) -> TreeNode<ArcElementType> {
        arc_root(&self.gateway, &self.arc.id)
    }

    pub fn milestone(&self, kind: ArcElementType) -> TreeNode<ArcElementType> {
        milestone(&self.gateway, &self.arc.id, kind)
    }

    pub fn add(
        &self,
        anchor: &NodeId,
        action: InsertAction,
        position: Position,
        node_type: &str,
        title: &str,
    ) -> AnyNode {
        self.gateway
            .create_node(
                &self.actor,
                anchor,
                action,
                position,
                &NewNode::new(node_type, NodePayload::titled(title)),
            )
            .unwrap_or_else(|e| panic!("adding {} '{}' failed: {}", node_type, title, e))
    }

    pub fn add_child(&self, parent: &NodeId, node_type: &str, title: &str) -> AnyNode {
        self.add(parent, InsertAction::AddChild, Position::LastChild, node_type, title)
    }

    /// Titles of the story tree in preorder, indented two spaces per level
    pub fn story_outline(&self) -> Vec<String> {
        story_outline(&self.gateway, &self.outline.id)
    }
}

pub fn arc_root(gateway: &NodeMutationGateway, arc: &ArcId) -> TreeNode<ArcElementType> {
    gateway
        .arcs()
        .tree()
        .root(&OwnerRef::Arc(*arc))
        .expect("arc root")
}

pub fn milestone(
    gateway: &NodeMutationGateway,
    arc: &ArcId,
    kind: ArcElementType,
) -> TreeNode<ArcElementType> {
    gateway
        .arcs()
        .milestones(&OwnerRef::Arc(*arc))
        .expect("milestones")
        .into_iter()
        .find(|m| m.node_type == kind)
        .unwrap_or_else(|| panic!("no {} milestone", kind))
}

pub fn story_outline(gateway: &NodeMutationGateway, outline: &OutlineId) -> Vec<String> {
    gateway
        .story_structure(&author(), outline)
        .expect("story structure")
        .iter()
        .map(|e| {
            format!(
                "{}{}",
                "  ".repeat(e.depth),
                e.node.payload.title.as_deref().unwrap_or("")
            )
        })
        .collect()
}
