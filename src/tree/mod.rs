//! Observable tree of nested mappings
//!
//! A tree is made of [`Node`]s. Writes mark keys dirty up to the root;
//! [`Node::notify`] later delivers the accumulated changes to observers,
//! deepest first.

mod node;
mod notify;
mod observer;

pub use node::{Entry, Node};
pub use observer::{Observer, ObserverId};
