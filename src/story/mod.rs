//! Story trees: the part/chapter/scene hierarchy of an outline

mod grammar;

pub use grammar::TypeGrammar;

use crate::error::{OutlineError, OutlineResult, Violation};
use crate::model::{Outline, OutlineId, OwnerRef, TreeKind};
use crate::storage::TreeStore;
use crate::tree::{
    check_associations, AnnotatedList, Intent, NodeKind, NodePayload, OrderedTree, Placement,
    TreeNode, TreeRules,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Node types of a story tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryElementType {
    Root,
    Part,
    Chapter,
    Scene,
    Sequel,
}

impl NodeKind for StoryElementType {
    const TREE: TreeKind = TreeKind::Story;
    const ROOT: Self = Self::Root;

    fn all() -> &'static [Self] {
        &[Self::Root, Self::Part, Self::Chapter, Self::Scene, Self::Sequel]
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Part => "part",
            Self::Chapter => "chapter",
            Self::Scene => "scene",
            Self::Sequel => "sequel",
        }
    }
}

impl fmt::Display for StoryElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain rules for story trees
pub struct StoryStructure {
    tree: OrderedTree<StoryElementType>,
    grammar: TypeGrammar,
}

impl StoryStructure {
    pub fn new(store: Arc<dyn TreeStore>, grammar: TypeGrammar) -> Self {
        Self {
            tree: OrderedTree::new(store),
            grammar,
        }
    }

    pub fn grammar(&self) -> &TypeGrammar {
        &self.grammar
    }

    /// Root node for a new outline, stored together with the outline
    pub fn root_for(&self, outline: &Outline) -> OutlineResult<TreeNode<StoryElementType>> {
        self.tree.new_root(
            OwnerRef::Outline(outline.id),
            outline.id,
            NodePayload::titled(outline.title.clone()),
        )
    }

    /// The outline's nodes in preorder, root excluded
    pub fn get_structure(
        &self,
        outline_id: &OutlineId,
    ) -> OutlineResult<AnnotatedList<StoryElementType>> {
        let root = self.tree.root(&OwnerRef::Outline(*outline_id))?;
        Ok(self.tree.get_subtree(&root)?.without_top())
    }
}

impl TreeRules for StoryStructure {
    type Kind = StoryElementType;

    fn tree(&self) -> &OrderedTree<StoryElementType> {
        &self.tree
    }

    fn validate_add(
        &self,
        placement: &Placement<StoryElementType>,
        new_type: StoryElementType,
    ) -> OutlineResult<()> {
        if new_type.is_root() {
            return Err(OutlineError::InvalidPlacement(Violation::RootIsFixed));
        }
        self.grammar
            .check(placement.parent.node_type, new_type, Intent::Insert)
    }

    fn validate_move(
        &self,
        node: &TreeNode<StoryElementType>,
        placement: &Placement<StoryElementType>,
    ) -> OutlineResult<()> {
        self.grammar
            .check(placement.parent.node_type, node.node_type, Intent::Move)
    }

    fn validate_delete(&self, node: &TreeNode<StoryElementType>) -> OutlineResult<()> {
        if node.is_root() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "the root of a tree cannot be deleted",
            });
        }
        Ok(())
    }

    fn validate_retype(
        &self,
        node: &TreeNode<StoryElementType>,
        new_type: StoryElementType,
    ) -> OutlineResult<()> {
        if node.is_root() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "the root of a tree cannot be retyped",
            });
        }
        if new_type.is_root() {
            return Err(OutlineError::InvalidPlacement(Violation::RootIsFixed));
        }
        if let Some(parent) = self.tree.get_parent(node)? {
            self.grammar
                .check(parent.node_type, new_type, Intent::Insert)?;
        }
        for child in self.tree.get_children(node)? {
            self.grammar
                .check(new_type, child.node_type, Intent::Insert)?;
        }
        Ok(())
    }

    fn validate_payload(&self, outline_id: OutlineId, payload: &NodePayload) -> OutlineResult<()> {
        if payload
            .title
            .as_deref()
            .map_or(true, |t| t.trim().is_empty())
        {
            return Err(OutlineError::Validation(Violation::BlankTitle));
        }
        if payload.story_node.is_some() {
            return Err(OutlineError::Validation(Violation::StoryLinkOnStoryNode));
        }
        check_associations(self.tree.store().as_ref(), outline_id, payload)
    }
}
