//! Storage backends for outlines
//!
//! Trees and their owners are persisted through the `TreeStore` trait.
//! The primary implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{Mutation, NodeRecord, OpenStore, StorageError, StorageResult, TreeStore};
