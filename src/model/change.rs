//! Change notifications delivered to observers

use super::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single change delivered by a notification pass
///
/// `old` is the value the entry held before its first modification in the
/// flush cycle; `new` is the value at flush time. Either side is `None`
/// when the entry did not exist. Branch values are reported as JSON
/// snapshots of the subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Path from the root of the tree to the changed entry
    pub path: Path,
    /// Path from the observing node, starting with the observed key
    pub relative: Path,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Kind of change, derived from which sides are present
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old, &self.new) {
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.new.is_none()
    }
}
