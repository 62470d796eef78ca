//! Key paths from the root of a tree

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ordered sequence of keys from the root of a tree to an entry
///
/// The root itself has the empty path. Paths display as dotted text
/// (`m1.meta.min`) and parse back from it.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    /// The empty (root) path
    pub fn root() -> Self {
        Path(Vec::new())
    }

    /// Build a path from its segments
    ///
    /// Unlike parsing, segments may contain `.`.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The last key of the path, `None` for the root
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Return a new path with `key` appended
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Path(segments)
    }

    pub fn push(&mut self, key: impl Into<String>) {
        self.0.push(key.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }

    /// Prepend a key in place
    pub(crate) fn prepend(&mut self, key: &str) {
        self.0.insert(0, key.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.0)
    }
}

impl FromStr for Path {
    type Err = Error;

    /// Parse a dotted path; the empty string is the root path
    ///
    /// Every `.` separates segments, so keys containing a dot cannot be
    /// written in this form. Use [`Path::new`] for those.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Path::root());
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::InvalidPath(s.to_string()));
        }
        Ok(Path(segments))
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Path(segments)
    }
}

impl From<&[&str]> for Path {
    fn from(segments: &[&str]) -> Self {
        Path::new(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Path {
    fn from(segments: [&str; N]) -> Self {
        Path::new(segments)
    }
}
