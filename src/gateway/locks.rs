//! Owner-scoped exclusive sections for structural mutations

use crate::model::OwnerRef;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One mutex per tree owner.
///
/// Mutations of the same tree run one at a time; different trees never
/// wait on each other. Reads do not take these locks.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: DashMap<OwnerRef, Arc<Mutex<()>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// The lock guarding `owner`'s tree
    pub fn lock_for(&self, owner: &OwnerRef) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(*owner).or_default())
    }

    /// Run `f` while holding `owner`'s lock
    pub fn with_owner<T>(&self, owner: &OwnerRef, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(owner);
        // Storage already rolled back whatever a panicking holder had open
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Drop the lock of a deleted owner
    pub fn forget(&self, owner: &OwnerRef) {
        self.locks.remove(owner);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
