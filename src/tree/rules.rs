//! Validation strategy implemented once per tree kind

use super::node::{NodeKind, NodePayload, TreeNode};
use super::ordered::{OrderedTree, Placement};
use crate::error::{OutlineError, OutlineResult, Violation};
use crate::model::{InstanceKind, OutlineId};
use crate::storage::TreeStore;

/// What a placement is being resolved for; decides how violations surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Insert,
    Move,
}

impl Intent {
    pub fn reject(self, violation: Violation) -> OutlineError {
        match self {
            Self::Insert => OutlineError::InvalidPlacement(violation),
            Self::Move => OutlineError::IllegalMove(violation),
        }
    }
}

/// Domain rules checked before the gateway lets a mutation reach the tree.
///
/// Every method only reads; a rejection leaves the tree untouched.
pub trait TreeRules: Send + Sync {
    type Kind: NodeKind;

    fn tree(&self) -> &OrderedTree<Self::Kind>;

    /// A new node of `new_type` at an already resolved placement
    fn validate_add(&self, placement: &Placement<Self::Kind>, new_type: Self::Kind)
        -> OutlineResult<()>;

    /// `node` relocated to a placement that passed the structural checks
    fn validate_move(
        &self,
        node: &TreeNode<Self::Kind>,
        placement: &Placement<Self::Kind>,
    ) -> OutlineResult<()>;

    fn validate_delete(&self, node: &TreeNode<Self::Kind>) -> OutlineResult<()>;

    /// An in-place type change, checked against the current parent and children
    fn validate_retype(&self, node: &TreeNode<Self::Kind>, new_type: Self::Kind)
        -> OutlineResult<()>;

    /// Content and associations of a node in `outline_id`
    fn validate_payload(&self, outline_id: OutlineId, payload: &NodePayload) -> OutlineResult<()> {
        check_associations(self.tree().store().as_ref(), outline_id, payload)
    }
}

/// Every associated instance exists, has the right kind and lives in `outline_id`
pub fn check_associations(
    store: &dyn TreeStore,
    outline_id: OutlineId,
    payload: &NodePayload,
) -> OutlineResult<()> {
    let tagged = payload
        .characters
        .iter()
        .map(|i| (i, InstanceKind::Character))
        .chain(payload.locations.iter().map(|i| (i, InstanceKind::Location)));

    for (id, expected) in tagged {
        let instance = store
            .load_instance(id)?
            .ok_or_else(|| OutlineError::not_found("instance", id))?;
        if instance.kind != expected {
            return Err(OutlineError::Validation(Violation::WrongInstanceKind {
                instance: *id,
                expected,
            }));
        }
        if instance.outline_id != outline_id {
            return Err(OutlineError::Validation(Violation::CrossOutline {
                instance: *id,
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instance, InstanceId, Outline};
    use crate::storage::{Mutation, OpenStore, SqliteStore};

    fn setup() -> (SqliteStore, Outline, Outline) {
        let store = SqliteStore::open_in_memory().unwrap();
        let o1 = Outline::new("one");
        let o2 = Outline::new("two");
        store
            .apply(&[
                Mutation::SaveOutline(o1.clone()),
                Mutation::SaveOutline(o2.clone()),
            ])
            .unwrap();
        (store, o1, o2)
    }

    #[test]
    fn test_intent_decides_error_kind() {
        assert!(matches!(
            Intent::Insert.reject(Violation::Cycle),
            OutlineError::InvalidPlacement(Violation::Cycle)
        ));
        assert!(matches!(
            Intent::Move.reject(Violation::Cycle),
            OutlineError::IllegalMove(Violation::Cycle)
        ));
    }

    #[test]
    fn test_same_outline_associations_pass() {
        let (store, o1, _) = setup();
        let hero = Instance::character(o1.id, "Hero");
        let town = Instance::location(o1.id, "Town");
        store
            .apply(&[
                Mutation::SaveInstance(hero.clone()),
                Mutation::SaveInstance(town.clone()),
            ])
            .unwrap();

        let payload = NodePayload::default()
            .with_character(hero.id)
            .with_location(town.id);
        check_associations(&store, o1.id, &payload).unwrap();
    }

    #[test]
    fn test_cross_outline_association_rejected() {
        let (store, o1, o2) = setup();
        let stranger = Instance::character(o2.id, "Stranger");
        store.apply(&[Mutation::SaveInstance(stranger.clone())]).unwrap();

        let payload = NodePayload::default().with_character(stranger.id);
        let err = check_associations(&store, o1.id, &payload).unwrap_err();
        assert!(matches!(
            err,
            OutlineError::Validation(Violation::CrossOutline { instance }) if instance == stranger.id
        ));
    }

    #[test]
    fn test_location_in_character_slot_rejected() {
        let (store, o1, _) = setup();
        let town = Instance::location(o1.id, "Town");
        store.apply(&[Mutation::SaveInstance(town.clone())]).unwrap();

        let payload = NodePayload::default().with_character(town.id);
        let err = check_associations(&store, o1.id, &payload).unwrap_err();
        assert!(matches!(
            err,
            OutlineError::Validation(Violation::WrongInstanceKind {
                expected: InstanceKind::Character,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_instance_is_not_found() {
        let (store, o1, _) = setup();
        let payload = NodePayload::default().with_location(InstanceId::new());
        assert!(matches!(
            check_associations(&store, o1.id, &payload).unwrap_err(),
            OutlineError::NotFound { kind: "instance", .. }
        ));
    }
}
