//! Core data model types for canopy

mod change;
mod path;

pub use change::{Change, ChangeKind};
pub use path::Path;
