//! # canopy
//!
//! A hierarchical, observable key-value store.
//!
//! canopy keeps shared configuration or state as a tree of nested mappings
//! that many collaborators can read and write without knowing about each
//! other.
//!
//! ## Core Concepts
//!
//! - **Nodes**: one level of the tree; nested JSON objects become child nodes
//! - **Merge**: sparse recursive updates, where `null` deletes a key
//! - **Observers**: per-key callbacks, fired by an explicit `notify()` flush
//! - **Cleanup**: reclamation of empty, unobserved subtrees
//!
//! ## Example
//!
//! ```
//! use canopy::{Change, Node};
//! use serde_json::json;
//!
//! let tree = Node::from_value(json!({"m1": {"meta": {"min": 0.0}}}))?;
//! tree.notify();
//!
//! tree.observe("m1", |change: &Change| {
//!     println!("{} -> {:?}", change.path, change.new);
//! });
//! tree.merge_value(&json!({"m1": {"meta": {"min": -1.0}}}))?;
//! let changes = tree.notify();
//! assert_eq!(changes[0].path.to_string(), "m1.meta.min");
//! # Ok::<(), canopy::Error>(())
//! ```

pub mod model;
pub mod ops;
pub mod tree;

mod error;

pub use error::{Error, Result};
pub use model::{Change, ChangeKind, Path};
pub use ops::{merge, validate_merge, MergeTarget};
pub use tree::{Entry, Node, Observer, ObserverId};
