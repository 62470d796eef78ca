//! Tree operations: sparse merge

mod merge;

pub use merge::{merge, validate_merge, MergeTarget};
