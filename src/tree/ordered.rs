//! Generic ordered-tree engine over materialized paths
//!
//! `OrderedTree<K>` knows nothing about arcs or stories. It resolves
//! positions to paths, enforces the structural rules every tree shares
//! (one root, no siblings of the root, no cycles, no cross-owner moves,
//! leaf types keep no children) and turns each mutation into a single
//! unit of work on the store. Domain rules are layered on top through
//! [`TreeRules`](super::TreeRules).

use super::annotated::AnnotatedList;
use super::node::{NodeKind, NodePayload, Position, TreeNode};
use super::path::{key_between, MaterializedPath, PathError};
use super::rules::Intent;
use crate::error::{OutlineError, OutlineResult, Violation};
use crate::model::{NodeId, OutlineId, OwnerRef};
use crate::storage::{Mutation, NodeRecord, StorageError, TreeStore};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Where a node would land: its future parent and path
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<K> {
    /// Node the position was given relative to
    pub anchor: NodeId,
    pub position: Position,
    /// The node that becomes the parent
    pub parent: TreeNode<K>,
    pub path: MaterializedPath,
}

impl<K> Placement<K> {
    pub fn depth(&self) -> usize {
        self.path.depth()
    }
}

/// Ordered tree of nodes typed by `K`, backed by a [`TreeStore`]
pub struct OrderedTree<K> {
    store: Arc<dyn TreeStore>,
    kind: PhantomData<fn() -> K>,
}

impl<K> Clone for OrderedTree<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            kind: PhantomData,
        }
    }
}

fn corrupt_path(err: PathError) -> OutlineError {
    OutlineError::StorageFailure(StorageError::Corrupt(err.to_string()))
}

impl<K: NodeKind> OrderedTree<K> {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self {
            store,
            kind: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    fn decode(record: NodeRecord) -> OutlineResult<TreeNode<K>> {
        Ok(TreeNode::from_record(record)?)
    }

    fn decode_all(records: Vec<NodeRecord>) -> OutlineResult<Vec<TreeNode<K>>> {
        records.into_iter().map(Self::decode).collect()
    }

    // === Reads ===

    /// A node of this tree kind, or `None` if missing or of the other kind
    pub fn find(&self, id: &NodeId) -> OutlineResult<Option<TreeNode<K>>> {
        match self.store.load_node(id)? {
            Some(record) if record.owner.tree_kind() == K::TREE => Ok(Some(Self::decode(record)?)),
            _ => Ok(None),
        }
    }

    pub fn get(&self, id: &NodeId) -> OutlineResult<TreeNode<K>> {
        self.find(id)?
            .ok_or_else(|| OutlineError::not_found("node", id))
    }

    /// Root of an owner's tree
    pub fn root(&self, owner: &OwnerRef) -> OutlineResult<TreeNode<K>> {
        self.store
            .load_children(owner, None)?
            .into_iter()
            .next()
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| OutlineError::not_found("tree", owner))
    }

    pub fn get_root(&self, node: &TreeNode<K>) -> OutlineResult<TreeNode<K>> {
        if node.path.depth() == 0 {
            return Ok(node.clone());
        }
        self.root(&node.owner)
    }

    pub fn get_parent(&self, node: &TreeNode<K>) -> OutlineResult<Option<TreeNode<K>>> {
        let Some(parent) = node.path.parent() else {
            return Ok(None);
        };
        let record = self
            .store
            .load_node_at(&node.owner, parent.as_str())?
            .ok_or_else(|| {
                StorageError::Corrupt(format!("node {} has no parent at {}", node.id, parent))
            })?;
        Ok(Some(Self::decode(record)?))
    }

    /// Children in document order
    pub fn get_children(&self, node: &TreeNode<K>) -> OutlineResult<Vec<TreeNode<K>>> {
        Self::decode_all(
            self.store
                .load_children(&node.owner, Some(node.path.as_str()))?,
        )
    }

    /// Other children of the same parent, in document order
    pub fn get_siblings(&self, node: &TreeNode<K>) -> OutlineResult<Vec<TreeNode<K>>> {
        let Some(parent) = node.path.parent() else {
            return Ok(Vec::new());
        };
        let records = self
            .store
            .load_children(&node.owner, Some(parent.as_str()))?;
        let mut siblings = Self::decode_all(records)?;
        siblings.retain(|s| s.id != node.id);
        Ok(siblings)
    }

    pub fn get_next_sibling(&self, node: &TreeNode<K>) -> OutlineResult<Option<TreeNode<K>>> {
        Ok(self
            .get_siblings(node)?
            .into_iter()
            .find(|s| s.path > node.path))
    }

    pub fn get_prev_sibling(&self, node: &TreeNode<K>) -> OutlineResult<Option<TreeNode<K>>> {
        Ok(self
            .get_siblings(node)?
            .into_iter()
            .rev()
            .find(|s| s.path < node.path))
    }

    /// Proper ancestors, root first
    pub fn get_ancestors(&self, node: &TreeNode<K>) -> OutlineResult<Vec<TreeNode<K>>> {
        let paths: Vec<String> = node
            .path
            .ancestors()
            .into_iter()
            .map(String::from)
            .collect();
        Self::decode_all(self.store.load_nodes_at(&node.owner, &paths)?)
    }

    /// Proper descendants in document order
    pub fn get_descendants(&self, node: &TreeNode<K>) -> OutlineResult<Vec<TreeNode<K>>> {
        let mut nodes = Self::decode_all(self.store.load_subtree(&node.owner, node.path.as_str())?)?;
        if !nodes.is_empty() {
            nodes.remove(0);
        }
        Ok(nodes)
    }

    /// `node` and all its descendants in preorder, with depths relative to `node`.
    ///
    /// Each call reads a fresh committed snapshot in a fixed number of queries.
    pub fn get_subtree(&self, node: &TreeNode<K>) -> OutlineResult<AnnotatedList<K>> {
        let nodes = Self::decode_all(self.store.load_subtree(&node.owner, node.path.as_str())?)?;
        Ok(AnnotatedList::from_preorder(nodes))
    }

    // === Position Resolution ===

    /// Resolve `position` relative to `anchor` into a parent and a fresh path.
    ///
    /// `moving` is left out of the neighbour search so a node can be
    /// positioned among its current siblings.
    pub fn resolve(
        &self,
        anchor: &TreeNode<K>,
        position: Position,
        moving: Option<&TreeNode<K>>,
        intent: Intent,
    ) -> OutlineResult<Placement<K>> {
        let parent = if position.is_child() {
            anchor.clone()
        } else {
            match self.get_parent(anchor)? {
                Some(parent) => parent,
                None => return Err(intent.reject(Violation::SiblingOfRoot)),
            }
        };

        if !parent.node_type.accepts_children() {
            return Err(intent.reject(Violation::LeafParent {
                parent_type: parent.node_type.as_str(),
            }));
        }

        let mut siblings = self.get_children(&parent)?;
        if let Some(moving) = moving {
            siblings.retain(|s| s.id != moving.id);
        }
        let keys: Vec<&str> = siblings.iter().map(|s| s.path.key()).collect();

        let (lower, upper) = match position {
            Position::FirstChild | Position::FirstSibling => (None, keys.first().copied()),
            Position::LastChild | Position::LastSibling => (keys.last().copied(), None),
            Position::Left | Position::Right => {
                let index = siblings
                    .iter()
                    .position(|s| s.id == anchor.id)
                    .ok_or_else(|| intent.reject(Violation::Cycle))?;
                if position == Position::Left {
                    (index.checked_sub(1).map(|i| keys[i]), Some(keys[index]))
                } else {
                    (Some(keys[index]), keys.get(index + 1).copied())
                }
            }
        };

        let key = key_between(lower, upper).map_err(corrupt_path)?;
        let path = parent.path.child(&key).map_err(corrupt_path)?;
        Ok(Placement {
            anchor: anchor.id,
            position,
            parent,
            path,
        })
    }

    // === Insertion ===

    /// Store a new node at a resolved placement
    pub fn insert(
        &self,
        placement: &Placement<K>,
        node_type: K,
        payload: NodePayload,
    ) -> OutlineResult<TreeNode<K>> {
        if node_type.is_root() {
            return Err(OutlineError::InvalidPlacement(Violation::RootIsFixed));
        }
        let node = TreeNode::new(
            placement.parent.owner,
            placement.parent.outline_id,
            node_type,
            placement.path.clone(),
            payload,
        );
        self.store.apply(&[Mutation::InsertNode(node.to_record())])?;
        debug!(node = %node.id, path = %node.path, "inserted node");
        Ok(node)
    }

    /// Add a node as the first or last child of `parent`
    pub fn add_child(
        &self,
        parent: &TreeNode<K>,
        node_type: K,
        payload: NodePayload,
        position: Position,
    ) -> OutlineResult<TreeNode<K>> {
        if !position.is_child() {
            return Err(OutlineError::InvalidPlacement(Violation::PositionMismatch {
                action: "add_child",
                position,
            }));
        }
        let placement = self.resolve(parent, position, None, Intent::Insert)?;
        self.insert(&placement, node_type, payload)
    }

    /// Add a node next to `reference` under the same parent
    pub fn add_sibling(
        &self,
        reference: &TreeNode<K>,
        node_type: K,
        payload: NodePayload,
        position: Position,
    ) -> OutlineResult<TreeNode<K>> {
        if position.is_child() {
            return Err(OutlineError::InvalidPlacement(Violation::PositionMismatch {
                action: "add_sibling",
                position,
            }));
        }
        let placement = self.resolve(reference, position, None, Intent::Insert)?;
        self.insert(&placement, node_type, payload)
    }

    /// A root node for `owner`, not yet stored.
    ///
    /// Roots are written in the same unit of work as their owner.
    pub fn new_root(
        &self,
        owner: OwnerRef,
        outline_id: OutlineId,
        payload: NodePayload,
    ) -> OutlineResult<TreeNode<K>> {
        let key = key_between(None, None).map_err(corrupt_path)?;
        let path = MaterializedPath::root(&key).map_err(corrupt_path)?;
        Ok(TreeNode::new(owner, outline_id, K::ROOT, path, payload))
    }

    // === Relocation ===

    /// Check the structural legality of moving `node` and resolve its destination
    pub fn plan_move(
        &self,
        node: &TreeNode<K>,
        target: &TreeNode<K>,
        position: Position,
    ) -> OutlineResult<Placement<K>> {
        if node.is_root() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "the root of a tree cannot be moved",
            });
        }
        if node.is_sentinel() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "structural nodes keep their place in the tree",
            });
        }
        if node.owner != target.owner {
            return Err(OutlineError::IllegalMove(Violation::CrossOwner));
        }
        if node.path.contains(&target.path) {
            return Err(OutlineError::IllegalMove(Violation::Cycle));
        }
        self.resolve(target, position, Some(node), Intent::Move)
    }

    /// Rewrite the paths of `node`'s subtree to the planned destination
    pub fn apply_move(
        &self,
        node: &TreeNode<K>,
        placement: &Placement<K>,
    ) -> OutlineResult<TreeNode<K>> {
        if placement.path == node.path {
            return Ok(node.clone());
        }
        self.store.apply(&[Mutation::Relocate {
            owner: node.owner,
            from: node.path.as_str().to_string(),
            to: placement.path.as_str().to_string(),
            depth_delta: placement.depth() as i64 - node.depth as i64,
        }])?;
        debug!(node = %node.id, from = %node.path, to = %placement.path, "moved subtree");

        let mut moved = node.clone();
        moved.path = placement.path.clone();
        moved.depth = placement.depth();
        Ok(moved)
    }

    /// Move `node` with its subtree to `position` relative to `target`
    pub fn move_node(
        &self,
        node: &TreeNode<K>,
        target: &TreeNode<K>,
        position: Position,
    ) -> OutlineResult<TreeNode<K>> {
        let placement = self.plan_move(node, target, position)?;
        self.apply_move(node, &placement)
    }

    // === Deletion ===

    /// Remove `node` and all of its descendants in one step
    pub fn delete_subtree(&self, node: &TreeNode<K>) -> OutlineResult<()> {
        if node.is_root() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "the root of a tree cannot be deleted",
            });
        }
        if node.is_sentinel() {
            return Err(OutlineError::ProtectedNode {
                id: node.id,
                reason: "structural nodes cannot be deleted",
            });
        }
        self.store.apply(&[Mutation::DeleteSubtree {
            owner: node.owner,
            path: node.path.as_str().to_string(),
        }])?;
        debug!(node = %node.id, path = %node.path, "deleted subtree");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Outline, TreeKind};
    use crate::storage::{OpenStore, SqliteStore};
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Shape {
        Root,
        Branch,
        Leaf,
    }

    impl fmt::Display for Shape {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl NodeKind for Shape {
        const TREE: TreeKind = TreeKind::Story;
        const ROOT: Self = Shape::Root;

        fn all() -> &'static [Self] {
            &[Shape::Root, Shape::Branch, Shape::Leaf]
        }

        fn as_str(&self) -> &'static str {
            match self {
                Shape::Root => "root",
                Shape::Branch => "branch",
                Shape::Leaf => "leaf",
            }
        }

        fn accepts_children(&self) -> bool {
            *self != Shape::Leaf
        }
    }

    fn setup() -> (OrderedTree<Shape>, TreeNode<Shape>) {
        let store: Arc<dyn TreeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tree = OrderedTree::<Shape>::new(store);
        let outline = Outline::new("shapes");
        let root = tree
            .new_root(OwnerRef::Outline(outline.id), outline.id, NodePayload::titled("root"))
            .unwrap();
        tree.store()
            .apply(&[
                Mutation::SaveOutline(outline),
                Mutation::InsertNode(root.to_record()),
            ])
            .unwrap();
        (tree, root)
    }

    fn branch(tree: &OrderedTree<Shape>, parent: &TreeNode<Shape>, title: &str) -> TreeNode<Shape> {
        tree.add_child(parent, Shape::Branch, NodePayload::titled(title), Position::LastChild)
            .unwrap()
    }

    fn titles(nodes: &[TreeNode<Shape>]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| n.payload.title.clone().unwrap_or_default())
            .collect()
    }

    fn subtree_titles(tree: &OrderedTree<Shape>, node: &TreeNode<Shape>) -> Vec<(String, usize)> {
        tree.get_subtree(node)
            .unwrap()
            .into_iter()
            .map(|e| (e.node.payload.title.unwrap_or_default(), e.depth))
            .collect()
    }

    #[test]
    fn test_first_and_last_child_ordering() {
        let (tree, root) = setup();
        branch(&tree, &root, "b");
        tree.add_child(&root, Shape::Branch, NodePayload::titled("a"), Position::FirstChild)
            .unwrap();
        branch(&tree, &root, "c");

        assert_eq!(titles(&tree.get_children(&root).unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sibling_positions() {
        let (tree, root) = setup();
        let b = branch(&tree, &root, "b");
        let d = branch(&tree, &root, "d");

        tree.add_sibling(&d, Shape::Branch, NodePayload::titled("c"), Position::Left)
            .unwrap();
        tree.add_sibling(&b, Shape::Branch, NodePayload::titled("bb"), Position::Right)
            .unwrap();
        tree.add_sibling(&b, Shape::Branch, NodePayload::titled("a"), Position::FirstSibling)
            .unwrap();
        tree.add_sibling(&b, Shape::Branch, NodePayload::titled("e"), Position::LastSibling)
            .unwrap();

        assert_eq!(
            titles(&tree.get_children(&root).unwrap()),
            vec!["a", "b", "bb", "c", "d", "e"]
        );
    }

    #[test]
    fn test_sibling_of_root_is_rejected() {
        let (tree, root) = setup();
        for position in [Position::FirstSibling, Position::LastSibling, Position::Left, Position::Right] {
            let err = tree
                .add_sibling(&root, Shape::Branch, NodePayload::default(), position)
                .unwrap_err();
            assert!(matches!(
                err,
                OutlineError::InvalidPlacement(Violation::SiblingOfRoot)
            ));
        }
    }

    #[test]
    fn test_position_must_match_action() {
        let (tree, root) = setup();
        let err = tree
            .add_child(&root, Shape::Branch, NodePayload::default(), Position::Left)
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::InvalidPlacement(Violation::PositionMismatch { .. })
        ));
    }

    #[test]
    fn test_leaf_types_keep_no_children() {
        let (tree, root) = setup();
        let leaf = tree
            .add_child(&root, Shape::Leaf, NodePayload::titled("leaf"), Position::LastChild)
            .unwrap();
        let err = tree
            .add_child(&leaf, Shape::Branch, NodePayload::default(), Position::LastChild)
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::InvalidPlacement(Violation::LeafParent { parent_type: "leaf" })
        ));
    }

    #[test]
    fn test_second_root_is_rejected() {
        let (tree, root) = setup();
        let err = tree
            .add_child(&root, Shape::Root, NodePayload::default(), Position::LastChild)
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::InvalidPlacement(Violation::RootIsFixed)
        ));
    }

    #[test]
    fn test_navigation_accessors() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let b = branch(&tree, &root, "b");
        let c = branch(&tree, &root, "c");
        let a1 = branch(&tree, &a, "a1");

        assert_eq!(tree.get_parent(&a1).unwrap().unwrap().id, a.id);
        assert!(tree.get_parent(&root).unwrap().is_none());
        assert_eq!(tree.get_root(&a1).unwrap().id, root.id);
        assert_eq!(tree.get_next_sibling(&a).unwrap().unwrap().id, b.id);
        assert_eq!(tree.get_prev_sibling(&c).unwrap().unwrap().id, b.id);
        assert!(tree.get_next_sibling(&c).unwrap().is_none());
        assert_eq!(titles(&tree.get_siblings(&b).unwrap()), vec!["a", "c"]);
        assert_eq!(titles(&tree.get_ancestors(&a1).unwrap()), vec!["root", "a"]);
        assert_eq!(titles(&tree.get_descendants(&root).unwrap()), vec!["a", "a1", "b", "c"]);
    }

    #[test]
    fn test_subtree_is_preorder_with_relative_depths() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let a1 = branch(&tree, &a, "a1");
        branch(&tree, &a1, "a1x");
        branch(&tree, &a, "a2");
        branch(&tree, &root, "b");

        assert_eq!(
            subtree_titles(&tree, &a),
            vec![
                ("a".to_string(), 0),
                ("a1".to_string(), 1),
                ("a1x".to_string(), 2),
                ("a2".to_string(), 1),
            ]
        );
        assert!(tree.get_subtree(&root).unwrap().is_depth_continuous());
    }

    #[test]
    fn test_move_carries_whole_subtree() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let a1 = branch(&tree, &a, "a1");
        branch(&tree, &a1, "a1x");
        let b = branch(&tree, &root, "b");

        let moved = tree.move_node(&a1, &b, Position::FirstChild).unwrap();
        assert_eq!(moved.depth, 2);

        assert_eq!(
            subtree_titles(&tree, &root),
            vec![
                ("root".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("a1".to_string(), 2),
                ("a1x".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_move_to_shallower_level_fixes_depths() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let a1 = branch(&tree, &a, "a1");
        let a1x = branch(&tree, &a1, "a1x");

        tree.move_node(&a1, &a, Position::Right).unwrap();

        let reloaded = tree.get(&a1x.id).unwrap();
        assert_eq!(reloaded.depth, 2);
        assert_eq!(reloaded.depth, reloaded.path.depth());
        assert_eq!(titles(&tree.get_children(&root).unwrap()), vec!["a", "a1"]);
    }

    #[test]
    fn test_reorder_among_current_siblings() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        branch(&tree, &root, "b");
        let c = branch(&tree, &root, "c");

        tree.move_node(&c, &a, Position::Left).unwrap();
        assert_eq!(titles(&tree.get_children(&root).unwrap()), vec!["c", "a", "b"]);

        let c = tree.get(&c.id).unwrap();
        tree.move_node(&a, &c, Position::Left).unwrap();
        assert_eq!(titles(&tree.get_children(&root).unwrap()), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_move_into_own_subtree_is_a_cycle() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let a1 = branch(&tree, &a, "a1");

        for target in [&a, &a1] {
            let err = tree.move_node(&a, target, Position::LastChild).unwrap_err();
            assert!(matches!(err, OutlineError::IllegalMove(Violation::Cycle)));
        }
        assert_eq!(tree.get(&a.id).unwrap().path, a.path);
    }

    #[test]
    fn test_move_to_sibling_of_root_is_illegal() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let err = tree.move_node(&a, &root, Position::Right).unwrap_err();
        assert!(matches!(
            err,
            OutlineError::IllegalMove(Violation::SiblingOfRoot)
        ));
    }

    #[test]
    fn test_move_across_owners_is_illegal() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");

        let other = Outline::new("other");
        let other_root = tree
            .new_root(OwnerRef::Outline(other.id), other.id, NodePayload::titled("root"))
            .unwrap();
        tree.store()
            .apply(&[
                Mutation::SaveOutline(other),
                Mutation::InsertNode(other_root.to_record()),
            ])
            .unwrap();

        let err = tree
            .move_node(&a, &other_root, Position::LastChild)
            .unwrap_err();
        assert!(matches!(err, OutlineError::IllegalMove(Violation::CrossOwner)));
    }

    #[test]
    fn test_root_cannot_move_or_be_deleted() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        assert!(matches!(
            tree.move_node(&root, &a, Position::LastChild).unwrap_err(),
            OutlineError::ProtectedNode { .. }
        ));
        assert!(matches!(
            tree.delete_subtree(&root).unwrap_err(),
            OutlineError::ProtectedNode { .. }
        ));
    }

    #[test]
    fn test_delete_subtree_removes_descendants_only() {
        let (tree, root) = setup();
        let a = branch(&tree, &root, "a");
        let a1 = branch(&tree, &a, "a1");
        let b = branch(&tree, &root, "b");

        tree.delete_subtree(&a).unwrap();

        assert!(tree.find(&a.id).unwrap().is_none());
        assert!(tree.find(&a1.id).unwrap().is_none());
        assert!(tree.find(&b.id).unwrap().is_some());
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let (tree, _) = setup();
        assert!(matches!(
            tree.get(&NodeId::new()).unwrap_err(),
            OutlineError::NotFound { kind: "node", .. }
        ));
    }
}
