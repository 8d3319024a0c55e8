//! Fiction Outlines: ordered story-structure trees
//!
//! An outline owns one story tree (parts, chapters, scenes) and any number
//! of arcs, each with its own beat tree hung on seven fixed milestones.
//! Both tree kinds share one materialized-path engine; their domain rules
//! are checked by the mutation gateway before anything reaches storage.
//!
//! # Core Concepts
//!
//! - **OrderedTree**: generic ordered tree stored as materialized paths
//! - **ArcStructure**: milestone skeleton and beat placement rules
//! - **StoryStructure**: part/chapter/scene grammar and associations
//! - **NodeMutationGateway**: authorize, validate, then apply atomically
//!
//! # Example
//!
//! ```
//! use fiction_outlines::{
//!     Actor, AllowAll, MaceType, NodeMutationGateway, OpenStore, OutlineConfig, SqliteStore,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let gateway =
//!     NodeMutationGateway::new(store, Arc::new(AllowAll), &OutlineConfig::default()).unwrap();
//! let me = Actor::new("author");
//!
//! let outline = gateway.create_outline(&me, "The Long Night", None).unwrap();
//! let arc = gateway
//!     .create_arc(&me, &outline.id, "Coming of age", MaceType::Character)
//!     .unwrap();
//! assert_eq!(gateway.arc_structure(&me, &arc.id).unwrap().len(), 7);
//! ```

pub mod arc;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod storage;
pub mod story;
pub mod tree;

pub use arc::{ArcElementType, ArcStructure, BeatMovePolicy};
pub use config::OutlineConfig;
pub use error::{OutlineError, OutlineResult, Violation};
pub use gateway::{
    Actor, AllowAll, AnyNode, Authorizer, InsertAction, NewNode, NodeMutationGateway, NodeUpdate,
    Operation, OwnerLocks, Resource,
};
pub use model::{
    ArcId, Instance, InstanceId, InstanceKind, MaceType, NodeId, Outline, OutlineId, OwnerRef,
    StoryArc, TreeKind,
};
pub use storage::{Mutation, NodeRecord, OpenStore, SqliteStore, StorageError, StorageResult, TreeStore};
pub use story::{StoryElementType, StoryStructure, TypeGrammar};
pub use tree::{
    AnnotatedEntry, AnnotatedList, MaterializedPath, NodeKind, NodePayload, OrderedTree,
    Placement, Position, TreeNode, TreeRules,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
