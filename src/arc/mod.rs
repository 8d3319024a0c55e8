//! Arc trees: the milestone skeleton and the beats between milestones
//!
//! Every arc tree is a root with seven milestone children in fixed order.
//! Everything added later is a beat, and every beat lies strictly between
//! the hook and the resolution in document order. Milestones are never
//! moved, retyped or deleted.

use crate::error::{OutlineError, OutlineResult, Violation};
use crate::model::{ArcId, OutlineId, OwnerRef, StoryArc, TreeKind};
use crate::storage::{Mutation, TreeStore};
use crate::tree::{
    check_associations, key_between, AnnotatedList, Intent, MaterializedPath, NodeKind,
    NodePayload, OrderedTree, Placement, TreeNode, TreeRules,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Node types of an arc tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcElementType {
    Root,
    Hook,
    #[serde(rename = "plot_point_1")]
    PlotPoint1,
    #[serde(rename = "pinch_point_1")]
    PinchPoint1,
    Midpoint,
    #[serde(rename = "plot_point_2")]
    PlotPoint2,
    #[serde(rename = "pinch_point_2")]
    PinchPoint2,
    Resolution,
    Beat,
}

impl ArcElementType {
    /// The milestones in canonical document order
    pub const MILESTONES: [ArcElementType; 7] = [
        Self::Hook,
        Self::PlotPoint1,
        Self::PinchPoint1,
        Self::Midpoint,
        Self::PlotPoint2,
        Self::PinchPoint2,
        Self::Resolution,
    ];

    pub fn is_milestone(&self) -> bool {
        Self::MILESTONES.contains(self)
    }

    /// Default headline of a skeleton node
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "Arc",
            Self::Hook => "Hook",
            Self::PlotPoint1 => "Plot Point 1",
            Self::PinchPoint1 => "Pinch Point 1",
            Self::Midpoint => "Midpoint",
            Self::PlotPoint2 => "Plot Point 2",
            Self::PinchPoint2 => "Pinch Point 2",
            Self::Resolution => "Resolution",
            Self::Beat => "Beat",
        }
    }
}

impl NodeKind for ArcElementType {
    const TREE: TreeKind = TreeKind::Arc;
    const ROOT: Self = Self::Root;

    fn all() -> &'static [Self] {
        &[
            Self::Root,
            Self::Hook,
            Self::PlotPoint1,
            Self::PinchPoint1,
            Self::Midpoint,
            Self::PlotPoint2,
            Self::PinchPoint2,
            Self::Resolution,
            Self::Beat,
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Hook => "hook",
            Self::PlotPoint1 => "plot_point_1",
            Self::PinchPoint1 => "pinch_point_1",
            Self::Midpoint => "midpoint",
            Self::PlotPoint2 => "plot_point_2",
            Self::PinchPoint2 => "pinch_point_2",
            Self::Resolution => "resolution",
            Self::Beat => "beat",
        }
    }

    fn is_sentinel(&self) -> bool {
        *self != Self::Beat
    }
}

impl fmt::Display for ArcElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a beat may travel when moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatMovePolicy {
    /// Anywhere strictly between hook and resolution
    #[default]
    AnySegment,
    /// Only within the interval between the two milestones around it
    SameSegment,
}

/// Domain rules for arc trees
pub struct ArcStructure {
    tree: OrderedTree<ArcElementType>,
    policy: BeatMovePolicy,
}

impl ArcStructure {
    pub fn new(store: Arc<dyn TreeStore>, policy: BeatMovePolicy) -> Self {
        Self {
            tree: OrderedTree::new(store),
            policy,
        }
    }

    pub fn policy(&self) -> BeatMovePolicy {
        self.policy
    }

    /// The arc row, root and seven milestones as one unit of work
    pub fn skeleton(
        &self,
        arc: &StoryArc,
    ) -> OutlineResult<(TreeNode<ArcElementType>, Vec<Mutation>)> {
        let owner = OwnerRef::Arc(arc.id);
        let root = self
            .tree
            .new_root(owner, arc.outline_id, NodePayload::titled(arc.name.clone()))?;

        let mut mutations = vec![
            Mutation::SaveArc(arc.clone()),
            Mutation::InsertNode(root.to_record()),
        ];
        let mut previous: Option<String> = None;
        for milestone in ArcElementType::MILESTONES {
            let key = key_between(previous.as_deref(), None).map_err(path_error)?;
            let path = root.path.child(&key).map_err(path_error)?;
            let node = TreeNode::new(
                owner,
                arc.outline_id,
                milestone,
                path,
                NodePayload::titled(milestone.label()),
            );
            mutations.push(Mutation::InsertNode(node.to_record()));
            previous = Some(key);
        }
        Ok((root, mutations))
    }

    /// Store an arc together with its full skeleton and return the root
    pub fn create_skeleton(&self, arc: &StoryArc) -> OutlineResult<TreeNode<ArcElementType>> {
        let (root, mutations) = self.skeleton(arc)?;
        self.tree.store().apply(&mutations)?;
        info!(arc = %arc.id, name = %arc.name, mace = %arc.mace_type, "created arc skeleton");
        Ok(root)
    }

    /// Milestones of an arc in document order
    pub fn milestones(&self, owner: &OwnerRef) -> OutlineResult<Vec<TreeNode<ArcElementType>>> {
        let root = self.tree.root(owner)?;
        let mut children = self.tree.get_children(&root)?;
        children.retain(|n| n.node_type.is_milestone());
        Ok(children)
    }

    /// The arc's nodes in preorder, root excluded
    pub fn get_structure(&self, arc_id: &ArcId) -> OutlineResult<AnnotatedList<ArcElementType>> {
        let root = self.tree.root(&OwnerRef::Arc(*arc_id))?;
        Ok(self.tree.get_subtree(&root)?.without_top())
    }

    /// Milestone interval a path falls in: the number of milestones before it
    fn segment(milestones: &[TreeNode<ArcElementType>], path: &MaterializedPath) -> usize {
        milestones.iter().filter(|m| &m.path < path).count()
    }

    fn check_between(
        milestones: &[TreeNode<ArcElementType>],
        path: &MaterializedPath,
        intent: Intent,
    ) -> OutlineResult<()> {
        let (Some(hook), Some(resolution)) = (milestones.first(), milestones.last()) else {
            return Err(intent.reject(Violation::OutsideMilestones));
        };
        if hook.path < *path && *path < resolution.path {
            Ok(())
        } else {
            Err(intent.reject(Violation::OutsideMilestones))
        }
    }
}

fn path_error(err: crate::tree::PathError) -> OutlineError {
    OutlineError::StorageFailure(crate::storage::StorageError::Corrupt(err.to_string()))
}

impl TreeRules for ArcStructure {
    type Kind = ArcElementType;

    fn tree(&self) -> &OrderedTree<ArcElementType> {
        &self.tree
    }

    fn validate_add(
        &self,
        placement: &Placement<ArcElementType>,
        new_type: ArcElementType,
    ) -> OutlineResult<()> {
        if new_type != ArcElementType::Beat {
            return Err(OutlineError::InvalidPlacement(Violation::BeatOnly {
                requested: new_type.as_str(),
            }));
        }
        let milestones = self.milestones(&placement.parent.owner)?;
        Self::check_between(&milestones, &placement.path, Intent::Insert)
    }

    fn validate_move(
        &self,
        node: &TreeNode<ArcElementType>,
        placement: &Placement<ArcElementType>,
    ) -> OutlineResult<()> {
        if node.is_sentinel() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "milestones keep their place in the arc",
            });
        }
        let milestones = self.milestones(&node.owner)?;
        Self::check_between(&milestones, &placement.path, Intent::Move)?;

        if self.policy == BeatMovePolicy::SameSegment {
            let from = Self::segment(&milestones, &node.path);
            let to = Self::segment(&milestones, &placement.path);
            if from != to {
                debug!(node = %node.id, from, to, "beat would change segment");
                return Err(OutlineError::IllegalMove(Violation::SegmentChange));
            }
        }
        Ok(())
    }

    fn validate_delete(&self, node: &TreeNode<ArcElementType>) -> OutlineResult<()> {
        if node.is_root() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "the root of a tree cannot be deleted",
            });
        }
        if node.is_sentinel() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "milestones cannot be deleted",
            });
        }
        Ok(())
    }

    fn validate_retype(
        &self,
        node: &TreeNode<ArcElementType>,
        new_type: ArcElementType,
    ) -> OutlineResult<()> {
        if node.is_sentinel() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "milestones cannot be retyped",
            });
        }
        if new_type != ArcElementType::Beat {
            return Err(OutlineError::InvalidPlacement(Violation::BeatOnly {
                requested: new_type.as_str(),
            }));
        }
        Ok(())
    }

    fn validate_payload(&self, outline_id: OutlineId, payload: &NodePayload) -> OutlineResult<()> {
        let store = self.tree.store();
        check_associations(store.as_ref(), outline_id, payload)?;

        if let Some(story_node) = payload.story_node {
            let record = store
                .load_node(&story_node)?
                .ok_or_else(|| OutlineError::not_found("story node", story_node))?;
            if record.owner.tree_kind() != TreeKind::Story || record.outline_id != outline_id {
                return Err(OutlineError::Validation(Violation::ForeignStoryNode {
                    node: story_node,
                }));
            }
        }
        Ok(())
    }
}
