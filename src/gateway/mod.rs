//! Request-facing orchestration of tree mutations
//!
//! Every request runs `received -> validated -> committed` or stops at
//! `rejected`. The gateway resolves which tree a node lives in and asks the
//! authorizer. Under the tree owner's lock it then runs the matching domain
//! rules and the write inside one store transaction, so nothing can commit
//! between the checks and the write. Only `ConcurrentModification` is
//! retried, and every retry re-validates from scratch.

mod auth;
mod locks;

pub use auth::{Actor, AllowAll, Authorizer, Operation, Resource};
pub use locks::OwnerLocks;

use crate::arc::{ArcElementType, ArcStructure};
use crate::config::OutlineConfig;
use crate::error::{OutlineError, OutlineResult, Violation};
use crate::model::{
    ArcId, Instance, InstanceId, InstanceKind, MaceType, NodeId, Outline, OutlineId, OwnerRef,
    StoryArc, TreeKind,
};
use crate::storage::{Mutation, NodeRecord, StorageError, TreeStore};
use crate::story::{StoryElementType, StoryStructure};
use crate::tree::{
    AnnotatedList, Intent, MaterializedPath, NodeKind, NodePayload, Position, TreeNode, TreeRules,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How a new node relates to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertAction {
    AddChild,
    AddSibling,
}

impl InsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddChild => "add_child",
            Self::AddSibling => "add_sibling",
        }
    }

    fn check(&self, position: Position) -> OutlineResult<()> {
        if position.is_child() == (*self == Self::AddChild) {
            Ok(())
        } else {
            Err(OutlineError::InvalidPlacement(Violation::PositionMismatch {
                action: self.as_str(),
                position,
            }))
        }
    }
}

/// Type name and content of a node to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    pub node_type: String,
    #[serde(flatten)]
    pub payload: NodePayload,
}

impl NewNode {
    pub fn new(node_type: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            node_type: node_type.into(),
            payload,
        }
    }
}

/// Text changes to a node; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub title: Option<String>,
    /// An empty string clears the description
    pub description: Option<String>,
}

impl NodeUpdate {
    fn apply_to(&self, payload: &mut NodePayload) {
        if let Some(title) = &self.title {
            payload.title = Some(title.clone());
        }
        if let Some(description) = &self.description {
            payload.description = if description.is_empty() {
                None
            } else {
                Some(description.clone())
            };
        }
    }
}

/// A node of either tree kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tree", rename_all = "lowercase")]
pub enum AnyNode {
    Arc(TreeNode<ArcElementType>),
    Story(TreeNode<StoryElementType>),
}

impl AnyNode {
    fn from_record(record: NodeRecord) -> OutlineResult<Self> {
        Ok(match record.owner.tree_kind() {
            TreeKind::Arc => Self::Arc(TreeNode::from_record(record)?),
            TreeKind::Story => Self::Story(TreeNode::from_record(record)?),
        })
    }

    pub fn id(&self) -> NodeId {
        match self {
            Self::Arc(n) => n.id,
            Self::Story(n) => n.id,
        }
    }

    pub fn owner(&self) -> OwnerRef {
        match self {
            Self::Arc(n) => n.owner,
            Self::Story(n) => n.owner,
        }
    }

    pub fn path(&self) -> &MaterializedPath {
        match self {
            Self::Arc(n) => &n.path,
            Self::Story(n) => &n.path,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Arc(n) => n.node_type.as_str(),
            Self::Story(n) => n.node_type.as_str(),
        }
    }

    pub fn payload(&self) -> &NodePayload {
        match self {
            Self::Arc(n) => &n.payload,
            Self::Story(n) => &n.payload,
        }
    }

    pub fn as_arc(&self) -> Option<&TreeNode<ArcElementType>> {
        match self {
            Self::Arc(n) => Some(n),
            Self::Story(_) => None,
        }
    }

    pub fn as_story(&self) -> Option<&TreeNode<StoryElementType>> {
        match self {
            Self::Story(n) => Some(n),
            Self::Arc(_) => None,
        }
    }
}

/// Run a helper generic over `TreeRules` with the rules of `owner`'s tree kind
macro_rules! with_rules {
    ($gateway:ident, $owner:expr, |$rules:ident| $body:expr) => {
        match $owner.tree_kind() {
            TreeKind::Arc => {
                let $rules = &$gateway.arcs;
                $body.map(AnyNode::Arc)
            }
            TreeKind::Story => {
                let $rules = &$gateway.stories;
                $body.map(AnyNode::Story)
            }
        }
    };
}

fn parse_type<K: NodeKind>(name: &str) -> OutlineResult<K> {
    K::parse(name).ok_or_else(|| {
        OutlineError::InvalidPlacement(Violation::UnknownType {
            tree: K::TREE.as_str(),
            name: name.to_string(),
        })
    })
}

/// Entry point for every outline, arc and node operation
pub struct NodeMutationGateway {
    store: Arc<dyn TreeStore>,
    arcs: ArcStructure,
    stories: StoryStructure,
    authorizer: Arc<dyn Authorizer>,
    locks: OwnerLocks,
    max_retries: u32,
}

impl NodeMutationGateway {
    pub fn new(
        store: Arc<dyn TreeStore>,
        authorizer: Arc<dyn Authorizer>,
        config: &OutlineConfig,
    ) -> OutlineResult<Self> {
        Ok(Self {
            arcs: ArcStructure::new(Arc::clone(&store), config.beat_moves),
            stories: StoryStructure::new(Arc::clone(&store), config.grammar()?),
            store,
            authorizer,
            locks: OwnerLocks::new(),
            max_retries: config.max_retries,
        })
    }

    pub fn arcs(&self) -> &ArcStructure {
        &self.arcs
    }

    pub fn stories(&self) -> &StoryStructure {
        &self.stories
    }

    // === Plumbing ===

    fn authorize(&self, actor: &Actor, operation: Operation, resource: Resource) -> OutlineResult<()> {
        if self.authorizer.is_authorized(actor, operation, &resource) {
            Ok(())
        } else {
            warn!(%actor, %operation, %resource, "rejected: not authorized");
            Err(OutlineError::Unauthorized {
                actor: actor.clone(),
                operation,
                resource,
            })
        }
    }

    fn load_record(&self, id: &NodeId) -> OutlineResult<NodeRecord> {
        self.store
            .load_node(id)?
            .ok_or_else(|| OutlineError::not_found("node", id))
    }

    fn load_outline(&self, id: &OutlineId) -> OutlineResult<Outline> {
        self.store
            .load_outline(id)?
            .ok_or_else(|| OutlineError::not_found("outline", id))
    }

    fn load_arc(&self, id: &ArcId) -> OutlineResult<StoryArc> {
        self.store
            .load_arc(id)?
            .ok_or_else(|| OutlineError::not_found("arc", id))
    }

    fn authorize_node(
        &self,
        actor: &Actor,
        operation: Operation,
        record: &NodeRecord,
    ) -> OutlineResult<()> {
        self.authorize(
            actor,
            operation,
            Resource::of_owner(&record.owner, record.outline_id),
        )
    }

    /// Run `attempt` under `owner`'s lock, retrying lost races with other writers
    fn mutate<T>(
        &self,
        owner: &OwnerRef,
        mut attempt: impl FnMut() -> OutlineResult<T>,
    ) -> OutlineResult<T> {
        self.locks.with_owner(owner, || {
            let mut retries = 0;
            loop {
                match self.serialized(&mut attempt) {
                    Ok(value) => {
                        debug!(%owner, "committed");
                        return Ok(value);
                    }
                    Err(err) if err.is_retryable() && retries < self.max_retries => {
                        retries += 1;
                        warn!(%owner, retries, error = %err, "retrying after concurrent modification");
                    }
                    Err(err) => {
                        debug!(%owner, error = %err, "rejected");
                        return Err(err);
                    }
                }
            }
        })
    }

    /// One attempt as a single store transaction.
    ///
    /// Position resolution, validation and the write all see the same
    /// state; writers on other connections cannot commit in between. An
    /// error from `attempt` rolls the transaction back.
    fn serialized<T>(&self, attempt: &mut impl FnMut() -> OutlineResult<T>) -> OutlineResult<T> {
        let mut outcome = None;
        self.store.exclusive(&mut || {
            let result = attempt();
            let commit = result.is_ok();
            outcome = Some(result);
            commit
        })?;
        outcome.unwrap_or_else(|| {
            Err(OutlineError::StorageFailure(StorageError::Corrupt(
                "unit of work ended without running".to_string(),
            )))
        })
    }

    // === Generic Tree Steps ===

    fn create_in<R: TreeRules>(
        &self,
        rules: &R,
        owner: &OwnerRef,
        anchor: NodeId,
        position: Position,
        new: &NewNode,
    ) -> OutlineResult<TreeNode<R::Kind>> {
        let node_type = parse_type::<R::Kind>(&new.node_type)?;
        let tree = rules.tree();
        self.mutate(owner, || {
            let anchor = tree.get(&anchor)?;
            let placement = tree.resolve(&anchor, position, None, Intent::Insert)?;
            rules.validate_add(&placement, node_type)?;
            rules.validate_payload(anchor.outline_id, &new.payload)?;
            debug!(path = %placement.path, "validated");
            tree.insert(&placement, node_type, new.payload.clone())
        })
    }

    fn move_in<R: TreeRules>(
        &self,
        rules: &R,
        owner: &OwnerRef,
        node: NodeId,
        target: NodeId,
        position: Position,
    ) -> OutlineResult<TreeNode<R::Kind>> {
        let tree = rules.tree();
        self.mutate(owner, || {
            let node = tree.get(&node)?;
            let target = tree.get(&target)?;
            let placement = tree.plan_move(&node, &target, position)?;
            rules.validate_move(&node, &placement)?;
            debug!(from = %node.path, to = %placement.path, "validated");
            tree.apply_move(&node, &placement)
        })
    }

    fn delete_in<R: TreeRules>(&self, rules: &R, owner: &OwnerRef, id: NodeId) -> OutlineResult<()> {
        let tree = rules.tree();
        self.mutate(owner, || {
            let node = tree.get(&id)?;
            rules.validate_delete(&node)?;
            debug!(path = %node.path, "validated");
            tree.delete_subtree(&node)
        })
    }

    fn retype_in<R: TreeRules>(
        &self,
        rules: &R,
        owner: &OwnerRef,
        id: NodeId,
        new_type: &str,
    ) -> OutlineResult<TreeNode<R::Kind>> {
        let new_type = parse_type::<R::Kind>(new_type)?;
        let tree = rules.tree();
        self.mutate(owner, || {
            let mut node = tree.get(&id)?;
            rules.validate_retype(&node, new_type)?;
            if node.node_type == new_type {
                return Ok(node);
            }
            node.node_type = new_type;
            node.modified_at = Utc::now();
            self.store.apply(&[Mutation::UpdateNode(node.to_record())])?;
            Ok(node)
        })
    }

    fn edit_in<R: TreeRules>(
        &self,
        rules: &R,
        owner: &OwnerRef,
        id: NodeId,
        edit: impl Fn(&mut NodePayload),
    ) -> OutlineResult<TreeNode<R::Kind>> {
        let tree = rules.tree();
        self.mutate(owner, || {
            let mut node = tree.get(&id)?;
            edit(&mut node.payload);
            rules.validate_payload(node.outline_id, &node.payload)?;
            node.modified_at = Utc::now();
            self.store.apply(&[Mutation::UpdateNode(node.to_record())])?;
            Ok(node)
        })
    }

    // === Node Mutations ===

    /// Add a node next to or under `anchor`, in whichever tree `anchor` lives
    #[instrument(skip_all, fields(actor = %actor, anchor = %anchor, ?action, %position))]
    pub fn create_node(
        &self,
        actor: &Actor,
        anchor: &NodeId,
        action: InsertAction,
        position: Position,
        new: &NewNode,
    ) -> OutlineResult<AnyNode> {
        debug!(node_type = %new.node_type, "received");
        action.check(position)?;
        let record = self.load_record(anchor)?;
        self.authorize_node(actor, Operation::Edit, &record)?;

        let owner = record.owner;
        let node = with_rules!(self, owner, |rules| self
            .create_in(rules, &owner, *anchor, position, new))?;
        info!(node = %node.id(), path = %node.path(), "created node");
        Ok(node)
    }

    /// Relocate `node` with its subtree to `position` relative to `target`
    #[instrument(skip_all, fields(actor = %actor, node = %node, target = %target, %position))]
    pub fn move_node(
        &self,
        actor: &Actor,
        node: &NodeId,
        target: &NodeId,
        position: Position,
    ) -> OutlineResult<AnyNode> {
        debug!("received");
        let record = self.load_record(node)?;
        let target_record = self.load_record(target)?;
        self.authorize_node(actor, Operation::Edit, &record)?;
        if record.owner != target_record.owner {
            debug!(from = %record.owner, to = %target_record.owner, "rejected: different trees");
            return Err(OutlineError::IllegalMove(Violation::CrossOwner));
        }

        let owner = record.owner;
        let moved = with_rules!(self, owner, |rules| self
            .move_in(rules, &owner, *node, *target, position))?;
        info!(node = %moved.id(), path = %moved.path(), "moved node");
        Ok(moved)
    }

    /// Delete a node and its whole subtree
    #[instrument(skip_all, fields(actor = %actor, node = %id))]
    pub fn delete_node(&self, actor: &Actor, id: &NodeId) -> OutlineResult<()> {
        debug!("received");
        let record = self.load_record(id)?;
        self.authorize_node(actor, Operation::Delete, &record)?;

        let owner = record.owner;
        match owner.tree_kind() {
            TreeKind::Arc => self.delete_in(&self.arcs, &owner, *id)?,
            TreeKind::Story => self.delete_in(&self.stories, &owner, *id)?,
        }
        info!(path = %record.path, "deleted node");
        Ok(())
    }

    /// Change a node's type in place
    #[instrument(skip_all, fields(actor = %actor, node = %id, new_type = %new_type))]
    pub fn retype_node(&self, actor: &Actor, id: &NodeId, new_type: &str) -> OutlineResult<AnyNode> {
        debug!("received");
        let record = self.load_record(id)?;
        self.authorize_node(actor, Operation::Edit, &record)?;

        let owner = record.owner;
        let node = with_rules!(self, owner, |rules| self
            .retype_in(rules, &owner, *id, new_type))?;
        info!(from = %record.node_type, to = %node.type_name(), "retyped node");
        Ok(node)
    }

    /// Change a node's title or description
    #[instrument(skip_all, fields(actor = %actor, node = %id))]
    pub fn update_node(
        &self,
        actor: &Actor,
        id: &NodeId,
        update: &NodeUpdate,
    ) -> OutlineResult<AnyNode> {
        debug!("received");
        let record = self.load_record(id)?;
        self.authorize_node(actor, Operation::Edit, &record)?;

        let owner = record.owner;
        with_rules!(self, owner, |rules| self
            .edit_in(rules, &owner, *id, |payload| update.apply_to(payload)))
    }

    /// Replace the characters and locations associated with a node
    #[instrument(skip_all, fields(actor = %actor, node = %id, characters = characters.len(), locations = locations.len()))]
    pub fn set_associations(
        &self,
        actor: &Actor,
        id: &NodeId,
        characters: BTreeSet<InstanceId>,
        locations: BTreeSet<InstanceId>,
    ) -> OutlineResult<AnyNode> {
        debug!("received");
        let record = self.load_record(id)?;
        self.authorize_node(actor, Operation::Edit, &record)?;

        let owner = record.owner;
        with_rules!(self, owner, |rules| self.edit_in(rules, &owner, *id, |payload| {
            payload.characters = characters.clone();
            payload.locations = locations.clone();
        }))
    }

    /// Point an arc node at the story node it is realized in, or clear the link
    #[instrument(skip_all, fields(actor = %actor, node = %id, ?story_node))]
    pub fn link_story_node(
        &self,
        actor: &Actor,
        id: &NodeId,
        story_node: Option<NodeId>,
    ) -> OutlineResult<TreeNode<ArcElementType>> {
        debug!("received");
        let record = self.load_record(id)?;
        if record.owner.tree_kind() != TreeKind::Arc {
            return Err(OutlineError::Validation(Violation::StoryLinkOnStoryNode));
        }
        self.authorize_node(actor, Operation::Edit, &record)?;
        self.edit_in(&self.arcs, &record.owner, *id, |payload| {
            payload.story_node = story_node;
        })
    }

    // === Owners ===

    /// Create an outline together with the root of its story tree
    #[instrument(skip_all, fields(actor = %actor, title = %title))]
    pub fn create_outline(
        &self,
        actor: &Actor,
        title: &str,
        description: Option<&str>,
    ) -> OutlineResult<Outline> {
        if title.trim().is_empty() {
            return Err(OutlineError::Validation(Violation::BlankTitle));
        }
        let mut outline = Outline::new(title.trim());
        if let Some(description) = description {
            outline = outline.with_description(description);
        }
        self.authorize(actor, Operation::Create, Resource::Outline(outline.id))?;

        let root = self.stories.root_for(&outline)?;
        let owner = OwnerRef::Outline(outline.id);
        self.mutate(&owner, || {
            Ok(self.store.apply(&[
                Mutation::SaveOutline(outline.clone()),
                Mutation::InsertNode(root.to_record()),
            ])?)
        })?;
        info!(outline = %outline.id, "created outline");
        Ok(outline)
    }

    /// Delete an outline with its story tree, arcs and instances
    #[instrument(skip_all, fields(actor = %actor, outline = %id))]
    pub fn delete_outline(&self, actor: &Actor, id: &OutlineId) -> OutlineResult<()> {
        let outline = self.load_outline(id)?;
        self.authorize(actor, Operation::Delete, Resource::Outline(outline.id))?;

        let arcs = self.store.list_arcs(id)?;
        let owner = OwnerRef::Outline(*id);
        self.mutate(&owner, || Ok(self.store.apply(&[Mutation::DeleteOutline(*id)])?))?;

        self.locks.forget(&owner);
        for arc in arcs {
            self.locks.forget(&OwnerRef::Arc(arc.id));
        }
        info!(title = %outline.title, "deleted outline");
        Ok(())
    }

    /// Create an arc in an outline; its root and seven milestones appear with it
    #[instrument(skip_all, fields(actor = %actor, outline = %outline_id, name = %name, %mace_type))]
    pub fn create_arc(
        &self,
        actor: &Actor,
        outline_id: &OutlineId,
        name: &str,
        mace_type: MaceType,
    ) -> OutlineResult<StoryArc> {
        let outline = self.load_outline(outline_id)?;
        self.authorize(actor, Operation::Edit, Resource::Outline(outline.id))?;
        if name.trim().is_empty() {
            return Err(OutlineError::Validation(Violation::BlankTitle));
        }

        let arc = StoryArc::new(outline.id, name.trim(), mace_type);
        self.mutate(&OwnerRef::Arc(arc.id), || {
            self.arcs.create_skeleton(&arc).map(|_| ())
        })?;
        Ok(arc)
    }

    /// Delete an arc with its whole tree
    #[instrument(skip_all, fields(actor = %actor, arc = %id))]
    pub fn delete_arc(&self, actor: &Actor, id: &ArcId) -> OutlineResult<()> {
        let arc = self.load_arc(id)?;
        self.authorize(
            actor,
            Operation::Delete,
            Resource::Arc {
                arc: arc.id,
                outline: arc.outline_id,
            },
        )?;

        let owner = OwnerRef::Arc(arc.id);
        self.mutate(&owner, || Ok(self.store.apply(&[Mutation::DeleteArc(arc.id)])?))?;
        self.locks.forget(&owner);
        info!(name = %arc.name, "deleted arc");
        Ok(())
    }

    /// Register a character or location for use in an outline's associations
    #[instrument(skip_all, fields(actor = %actor, outline = %outline_id, %kind, label = %label))]
    pub fn create_instance(
        &self,
        actor: &Actor,
        outline_id: &OutlineId,
        kind: InstanceKind,
        label: &str,
    ) -> OutlineResult<Instance> {
        let outline = self.load_outline(outline_id)?;
        self.authorize(actor, Operation::Edit, Resource::Outline(outline.id))?;
        if label.trim().is_empty() {
            return Err(OutlineError::Validation(Violation::BlankTitle));
        }

        let instance = match kind {
            InstanceKind::Character => Instance::character(outline.id, label.trim()),
            InstanceKind::Location => Instance::location(outline.id, label.trim()),
        };
        self.mutate(&OwnerRef::Outline(outline.id), || {
            Ok(self.store.apply(&[Mutation::SaveInstance(instance.clone())])?)
        })?;
        info!(instance = %instance.id, "created instance");
        Ok(instance)
    }

    // === Reads ===

    /// Outlines the actor may view
    pub fn outlines(&self, actor: &Actor) -> OutlineResult<Vec<Outline>> {
        Ok(self
            .store
            .list_outlines()?
            .into_iter()
            .filter(|o| {
                self.authorizer
                    .is_authorized(actor, Operation::View, &Resource::Outline(o.id))
            })
            .collect())
    }

    pub fn arcs_of(&self, actor: &Actor, outline_id: &OutlineId) -> OutlineResult<Vec<StoryArc>> {
        let outline = self.load_outline(outline_id)?;
        self.authorize(actor, Operation::View, Resource::Outline(outline.id))?;
        Ok(self.store.list_arcs(outline_id)?)
    }

    pub fn instances_of(&self, actor: &Actor, outline_id: &OutlineId) -> OutlineResult<Vec<Instance>> {
        let outline = self.load_outline(outline_id)?;
        self.authorize(actor, Operation::View, Resource::Outline(outline.id))?;
        Ok(self.store.list_instances(outline_id)?)
    }

    pub fn node(&self, actor: &Actor, id: &NodeId) -> OutlineResult<AnyNode> {
        let record = self.load_record(id)?;
        self.authorize_node(actor, Operation::View, &record)?;
        AnyNode::from_record(record)
    }

    /// Beat sheet of an arc, root excluded
    pub fn arc_structure(
        &self,
        actor: &Actor,
        arc_id: &ArcId,
    ) -> OutlineResult<AnnotatedList<ArcElementType>> {
        let arc = self.load_arc(arc_id)?;
        self.authorize(
            actor,
            Operation::View,
            Resource::Arc {
                arc: arc.id,
                outline: arc.outline_id,
            },
        )?;
        self.arcs.get_structure(arc_id)
    }

    /// Part/chapter/scene hierarchy of an outline, root excluded
    pub fn story_structure(
        &self,
        actor: &Actor,
        outline_id: &OutlineId,
    ) -> OutlineResult<AnnotatedList<StoryElementType>> {
        let outline = self.load_outline(outline_id)?;
        self.authorize(actor, Operation::View, Resource::Outline(outline.id))?;
        self.stories.get_structure(outline_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore, StorageResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Delegates to SQLite but reports a busy database for the first writes
    struct FlakyStore {
        inner: SqliteStore,
        failures_left: AtomicU32,
        writes: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                failures_left: AtomicU32::new(failures),
                writes: AtomicU32::new(0),
            }
        }

        fn busy() -> StorageError {
            StorageError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            ))
        }
    }

    impl TreeStore for FlakyStore {
        fn load_outline(&self, id: &OutlineId) -> StorageResult<Option<Outline>> {
            self.inner.load_outline(id)
        }
        fn list_outlines(&self) -> StorageResult<Vec<Outline>> {
            self.inner.list_outlines()
        }
        fn load_arc(&self, id: &ArcId) -> StorageResult<Option<StoryArc>> {
            self.inner.load_arc(id)
        }
        fn list_arcs(&self, outline_id: &OutlineId) -> StorageResult<Vec<StoryArc>> {
            self.inner.list_arcs(outline_id)
        }
        fn load_instance(&self, id: &InstanceId) -> StorageResult<Option<Instance>> {
            self.inner.load_instance(id)
        }
        fn list_instances(&self, outline_id: &OutlineId) -> StorageResult<Vec<Instance>> {
            self.inner.list_instances(outline_id)
        }
        fn load_node(&self, id: &NodeId) -> StorageResult<Option<NodeRecord>> {
            self.inner.load_node(id)
        }
        fn load_node_at(&self, owner: &OwnerRef, path: &str) -> StorageResult<Option<NodeRecord>> {
            self.inner.load_node_at(owner, path)
        }
        fn load_nodes_at(&self, owner: &OwnerRef, paths: &[String]) -> StorageResult<Vec<NodeRecord>> {
            self.inner.load_nodes_at(owner, paths)
        }
        fn load_children(
            &self,
            owner: &OwnerRef,
            parent_path: Option<&str>,
        ) -> StorageResult<Vec<NodeRecord>> {
            self.inner.load_children(owner, parent_path)
        }
        fn load_subtree(&self, owner: &OwnerRef, path: &str) -> StorageResult<Vec<NodeRecord>> {
            self.inner.load_subtree(owner, path)
        }
        fn exclusive(&self, work: &mut dyn FnMut() -> bool) -> StorageResult<()> {
            self.inner.exclusive(work)
        }
        fn apply(&self, mutations: &[Mutation]) -> StorageResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(Self::busy());
            }
            self.inner.apply(mutations)
        }
    }

    fn gateway_over(store: Arc<dyn TreeStore>) -> NodeMutationGateway {
        NodeMutationGateway::new(store, Arc::new(AllowAll), &OutlineConfig::default()).unwrap()
    }

    fn actor() -> Actor {
        Actor::new("writer")
    }

    #[test]
    fn test_busy_writes_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let gateway = gateway_over(store.clone());

        let outline = gateway.create_outline(&actor(), "Retried", None).unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
        assert!(gateway.story_structure(&actor(), &outline.id).unwrap().is_empty());
    }

    #[test]
    fn test_retries_are_bounded() {
        let store = Arc::new(FlakyStore::new(10));
        let gateway = gateway_over(store.clone());

        let err = gateway.create_outline(&actor(), "Doomed", None).unwrap_err();
        assert!(matches!(err, OutlineError::ConcurrentModification(_)));
        // One attempt plus the default two retries
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
        assert!(store.list_outlines().unwrap().is_empty());
    }

    #[test]
    fn test_instance_creation_is_retried() {
        let store = Arc::new(FlakyStore::new(0));
        let gateway = gateway_over(store.clone());
        let outline = gateway.create_outline(&actor(), "Cast", None).unwrap();

        store.failures_left.store(2, Ordering::SeqCst);
        let hero = gateway
            .create_instance(&actor(), &outline.id, InstanceKind::Character, "Hero")
            .unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 4);
        assert_eq!(gateway.instances_of(&actor(), &outline.id).unwrap(), vec![hero]);
    }

    #[test]
    fn test_failed_attempt_rolls_back_its_reads_and_writes() {
        let store: Arc<dyn TreeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let gateway = gateway_over(Arc::clone(&store));
        let outline = gateway.create_outline(&actor(), "Undo", None).unwrap();
        let owner = OwnerRef::Outline(outline.id);
        let root = gateway.stories().tree().root(&owner).unwrap();

        // A write that succeeds inside an attempt that then fails must not stick
        let err = gateway
            .mutate(&owner, || {
                gateway.stories().tree().insert(
                    &gateway
                        .stories()
                        .tree()
                        .resolve(&root, Position::LastChild, None, Intent::Insert)?,
                    StoryElementType::Chapter,
                    NodePayload::titled("Ghost"),
                )?;
                Err::<(), _>(OutlineError::Validation(Violation::BlankTitle))
            })
            .unwrap_err();
        assert!(matches!(err, OutlineError::Validation(Violation::BlankTitle)));
        assert!(gateway.story_structure(&actor(), &outline.id).unwrap().is_empty());
    }

    #[test]
    fn test_unauthorized_request_has_no_side_effects() {
        let store: Arc<dyn TreeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let owner_gateway = gateway_over(Arc::clone(&store));
        let outline = owner_gateway
            .create_outline(&actor(), "Private", None)
            .unwrap();
        let root = owner_gateway
            .stories()
            .tree()
            .root(&OwnerRef::Outline(outline.id))
            .unwrap();

        let viewer_only = |_: &Actor, op: Operation, _: &Resource| op == Operation::View;
        let gateway =
            NodeMutationGateway::new(Arc::clone(&store), Arc::new(viewer_only), &OutlineConfig::default())
                .unwrap();

        let err = gateway
            .create_node(
                &Actor::new("guest"),
                &root.id,
                InsertAction::AddChild,
                Position::LastChild,
                &NewNode::new("chapter", NodePayload::titled("One")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::Unauthorized {
                operation: Operation::Edit,
                ..
            }
        ));
        assert!(gateway
            .story_structure(&Actor::new("guest"), &outline.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_action_and_position_must_agree() {
        let store: Arc<dyn TreeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let gateway = gateway_over(store);
        let outline = gateway.create_outline(&actor(), "Mismatch", None).unwrap();
        let root = gateway
            .stories()
            .tree()
            .root(&OwnerRef::Outline(outline.id))
            .unwrap();

        let err = gateway
            .create_node(
                &actor(),
                &root.id,
                InsertAction::AddSibling,
                Position::LastChild,
                &NewNode::new("chapter", NodePayload::titled("One")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::InvalidPlacement(Violation::PositionMismatch {
                action: "add_sibling",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_type_names_rejected() {
        let store: Arc<dyn TreeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let gateway = gateway_over(store);
        let outline = gateway.create_outline(&actor(), "Types", None).unwrap();
        let root = gateway
            .stories()
            .tree()
            .root(&OwnerRef::Outline(outline.id))
            .unwrap();

        let err = gateway
            .create_node(
                &actor(),
                &root.id,
                InsertAction::AddChild,
                Position::LastChild,
                &NewNode::new("beat", NodePayload::titled("Nope")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::InvalidPlacement(Violation::UnknownType { tree: "story", .. })
        ));
    }

    #[test]
    fn test_update_edits_text_only() {
        let store: Arc<dyn TreeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let gateway = gateway_over(store);
        let outline = gateway.create_outline(&actor(), "Edits", None).unwrap();
        let root = gateway
            .stories()
            .tree()
            .root(&OwnerRef::Outline(outline.id))
            .unwrap();
        let chapter = gateway
            .create_node(
                &actor(),
                &root.id,
                InsertAction::AddChild,
                Position::LastChild,
                &NewNode::new(
                    "chapter",
                    NodePayload::titled("One").with_description("draft"),
                ),
            )
            .unwrap();

        let update = NodeUpdate {
            title: Some("Chapter One".into()),
            description: Some(String::new()),
        };
        let updated = gateway.update_node(&actor(), &chapter.id(), &update).unwrap();
        assert_eq!(updated.payload().title.as_deref(), Some("Chapter One"));
        assert_eq!(updated.payload().description, None);
        assert_eq!(updated.path(), chapter.path());

        let blank = NodeUpdate {
            title: Some(" ".into()),
            ..Default::default()
        };
        assert!(matches!(
            gateway.update_node(&actor(), &chapter.id(), &blank),
            Err(OutlineError::Validation(Violation::BlankTitle))
        ));
    }
}
