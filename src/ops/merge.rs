//! Sparse recursive merge of a source mapping into a destination
//!
//! For every `(key, value)` of the source:
//! - `null` deletes the key from the destination (the key must exist)
//! - a key missing from the destination is inserted verbatim
//! - a mapping merged onto a mapping recurses
//! - anything else replaces the destination value wholesale
//!
//! Only mappings merge; arrays and scalars always overwrite.

use crate::model::Path;
use crate::{Error, Result};
use serde_json::{Map, Value};

/// A mapping that can receive a merge
///
/// Implemented for plain JSON objects and for [`crate::Node`]. The merge
/// algorithm only needs to test for keys, reach nested mappings, assign and
/// delete.
pub trait MergeTarget {
    /// Path of this mapping, used to report errors
    fn base_path(&self) -> Path {
        Path::root()
    }

    fn contains_key(&self, key: &str) -> bool;

    /// Run `f` on the nested mapping stored at `key`, if there is one
    fn visit_child<R>(&self, key: &str, f: impl FnOnce(&Self) -> R) -> Option<R>;

    /// Run `f` on the nested mapping stored at `key` mutably, if there is one
    fn with_child_mut<R>(&mut self, key: &str, f: impl FnOnce(&mut Self) -> R) -> Option<R>;

    /// Insert or replace the value at `key`
    fn assign(&mut self, key: &str, value: &Value);

    /// Remove `key`, returning `false` if it was not present
    fn delete(&mut self, key: &str) -> bool;
}

impl MergeTarget for Map<String, Value> {
    fn contains_key(&self, key: &str) -> bool {
        Map::contains_key(self, key)
    }

    fn visit_child<R>(&self, key: &str, f: impl FnOnce(&Self) -> R) -> Option<R> {
        self.get(key).and_then(Value::as_object).map(f)
    }

    fn with_child_mut<R>(&mut self, key: &str, f: impl FnOnce(&mut Self) -> R) -> Option<R> {
        self.get_mut(key).and_then(Value::as_object_mut).map(f)
    }

    fn assign(&mut self, key: &str, value: &Value) {
        self.insert(key.to_string(), value.clone());
    }

    fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }
}

/// Merge `source` into `destination` in place and return the destination
///
/// The whole source is validated first, so an update that deletes a
/// missing key fails with [`Error::MissingKey`] before anything is applied.
pub fn merge<'a, D: MergeTarget>(
    destination: &'a mut D,
    source: &Map<String, Value>,
) -> Result<&'a mut D> {
    validate_merge(destination, source)?;
    let mut path = destination.base_path();
    apply(destination, source, &mut path)?;
    Ok(destination)
}

/// Check that `source` can be merged into `destination` without applying it
pub fn validate_merge<D: MergeTarget>(destination: &D, source: &Map<String, Value>) -> Result<()> {
    let mut path = destination.base_path();
    validate(destination, source, &mut path)
}

fn validate<D: MergeTarget>(dest: &D, source: &Map<String, Value>, path: &mut Path) -> Result<()> {
    for (key, value) in source {
        match value {
            Value::Null => {
                if !dest.contains_key(key) {
                    return Err(Error::MissingKey {
                        path: path.child(key.as_str()),
                    });
                }
            }
            Value::Object(nested) => {
                let outcome = dest.visit_child(key, |child| {
                    path.push(key.as_str());
                    let outcome = validate(child, nested, path);
                    path.pop();
                    outcome
                });
                if let Some(outcome) = outcome {
                    outcome?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn apply<D: MergeTarget>(dest: &mut D, source: &Map<String, Value>, path: &mut Path) -> Result<()> {
    for (key, value) in source {
        match value {
            Value::Null => {
                if !dest.delete(key) {
                    // Only reachable if a concurrent writer removed the key
                    // after validation.
                    return Err(Error::MissingKey {
                        path: path.child(key.as_str()),
                    });
                }
            }
            Value::Object(nested) => {
                let merged = dest.with_child_mut(key, |child| {
                    path.push(key.as_str());
                    let outcome = apply(child, nested, path);
                    path.pop();
                    outcome
                });
                match merged {
                    Some(outcome) => outcome?,
                    None => dest.assign(key, value),
                }
            }
            _ => dest.assign(key, value),
        }
    }
    Ok(())
}
