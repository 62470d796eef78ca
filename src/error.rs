//! Error types for canopy

use crate::model::Path;
use crate::tree::ObserverId;
use thiserror::Error;

/// Result type alias for canopy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in canopy operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing key: {path}")]
    MissingKey { path: Path },

    #[error("Attempted to remove unregistered observer {id} from key {key:?}")]
    UnregisteredObserver { key: String, id: ObserverId },

    #[error("Not a branch: {path}")]
    NotABranch { path: Path },

    #[error("Not a mapping: {0}")]
    NotAMapping(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
