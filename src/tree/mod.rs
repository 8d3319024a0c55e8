//! Ordered trees stored as materialized paths
//!
//! - `path`: key generation and path arithmetic
//! - `node`: node types, payloads and positions
//! - `ordered`: the generic engine
//! - `annotated`: preorder listings with relative depths
//! - `rules`: the validation strategy each tree kind implements

mod annotated;
mod node;
mod ordered;
pub mod path;
mod rules;

pub use annotated::{AnnotatedEntry, AnnotatedList};
pub use node::{NodeKind, NodePayload, Position, TreeNode};
pub use ordered::{OrderedTree, Placement};
pub use path::{key_between, MaterializedPath, PathError};
pub use rules::{check_associations, Intent, TreeRules};
