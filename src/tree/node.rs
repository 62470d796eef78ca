//! Observable tree node

use super::observer::{Observer, ObserverId, ObserverRegistry};
use crate::model::Path;
use crate::ops::{self, MergeTarget};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// The value stored under a key of a [`Node`]
#[derive(Clone, Debug)]
pub enum Entry {
    /// Any non-null, non-object JSON value
    Leaf(Value),
    /// A nested mapping, wrapped as a child node
    Branch(Node),
}

impl Entry {
    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Entry::Leaf(value) => Some(value),
            Entry::Branch(_) => None,
        }
    }

    pub fn as_branch(&self) -> Option<&Node> {
        match self {
            Entry::Branch(node) => Some(node),
            Entry::Leaf(_) => None,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Entry::Branch(_))
    }

    /// JSON snapshot of this entry (recursive for branches)
    pub fn to_value(&self) -> Value {
        match self {
            Entry::Leaf(value) => value.clone(),
            Entry::Branch(node) => node.to_value(),
        }
    }

    /// Value this entry held when the current flush cycle began
    fn cycle_start_value(&self) -> Value {
        match self {
            Entry::Leaf(value) => value.clone(),
            Entry::Branch(node) => node.cycle_start_value(),
        }
    }
}

impl PartialEq<Value> for Entry {
    fn eq(&self, other: &Value) -> bool {
        self.to_value() == *other
    }
}

/// What a dirty key is waiting to report on the next flush
#[derive(Clone, Debug)]
pub(super) enum Pending {
    /// The key itself was assigned or removed; holds the value it had
    /// before its first modification in this flush cycle
    Replaced(Option<Value>),
    /// Only something below the branch at this key changed
    Descendant,
}

impl Pending {
    pub(super) fn into_old(self) -> Option<Value> {
        match self {
            Pending::Replaced(old) => old,
            Pending::Descendant => None,
        }
    }
}

#[derive(Default)]
pub(super) struct State {
    pub(super) dirty: BTreeMap<String, Pending>,
    pub(super) observers: ObserverRegistry,
}

pub(super) struct Inner {
    /// Key under which this node lives in its parent; fixed at creation
    key: Option<String>,
    parent: Mutex<Option<Weak<Inner>>>,
    entries: RwLock<BTreeMap<String, Entry>>,
    pub(super) state: Mutex<State>,
}

/// One level of an observable tree of mappings
///
/// A `Node` is a cheap, clonable handle; clones refer to the same node.
/// Nested JSON objects assigned as values are wrapped into child nodes.
/// Every mutation marks the key dirty here and in every ancestor, and
/// observers registered with [`Node::observe`] see the change the next time
/// [`Node::notify`] runs on a node above it.
///
/// Children are owned by their parent; the parent link is weak and is
/// cleared when a child is replaced, removed or cleaned up.
#[derive(Clone)]
pub struct Node {
    pub(super) inner: Arc<Inner>,
}

impl Node {
    /// Create a node
    ///
    /// With no parent this creates a root. With a parent, the new node is
    /// installed into `parent[key]`, replacing whatever was there. A key
    /// without a parent (or a parent without a key) is rejected.
    pub fn new(parent: Option<&Node>, key: Option<&str>, entries: &Map<String, Value>) -> Result<Self> {
        match (parent, key) {
            (None, None) => Ok(Node::from_map(entries)),
            (Some(parent), Some(key)) => {
                let child = parent.adopt(key, entries.clone());
                parent.insert_entry(key, Entry::Branch(child.clone()));
                Ok(child)
            }
            (None, Some(key)) => Err(Error::InvalidArgument(format!(
                "cannot specify key {key:?} without a parent node"
            ))),
            (Some(parent), None) => Err(Error::InvalidArgument(format!(
                "a child of {:?} needs a key",
                parent.path().to_string()
            ))),
        }
    }

    /// Create an empty root node
    pub fn root() -> Self {
        Node::detached(None)
    }

    /// Create a root node holding `entries`
    ///
    /// The entries go through [`Node::set`], so they are dirty until the
    /// first flush.
    pub fn from_map(entries: &Map<String, Value>) -> Self {
        let node = Node::root();
        node.update(entries);
        node
    }

    /// Create a root node from a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let node = Node::root();
                node.update_owned(map);
                Ok(node)
            }
            other => Err(Error::NotAMapping(type_name(&other).to_string())),
        }
    }

    /// Create a root node from JSON text holding an object
    pub fn from_json(text: &str) -> Result<Self> {
        Node::from_value(serde_json::from_str(text)?)
    }

    fn detached(key: Option<String>) -> Self {
        Node {
            inner: Arc::new(Inner {
                key,
                parent: Mutex::new(None),
                entries: RwLock::new(BTreeMap::new()),
                state: Mutex::new(State::default()),
            }),
        }
    }

    // === Structure ===

    /// Key under which this node is stored in its parent
    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    /// The parent node, `None` for a root or a detached node
    pub fn parent(&self) -> Option<Node> {
        self.inner
            .parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Node { inner })
    }

    /// Keys from the root down to this node; empty for the root
    pub fn path(&self) -> Path {
        let mut segments = Vec::new();
        let mut current = self.clone();
        while let (Some(key), Some(parent)) = (current.inner.key.clone(), current.parent()) {
            segments.push(key);
            current = parent;
        }
        segments.reverse();
        Path::from(segments)
    }

    /// Whether two handles refer to the same node
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn attach(&self, parent: &Node) {
        *self.inner.parent.lock() = Some(Arc::downgrade(&parent.inner));
    }

    fn detach(&self) {
        *self.inner.parent.lock() = None;
    }

    // === Reads ===

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.inner.entries.read().get(key).cloned()
    }

    /// JSON snapshot of the value at `key`
    pub fn value(&self, key: &str) -> Result<Value> {
        self.get(key)
            .map(|entry| entry.to_value())
            .ok_or_else(|| Error::MissingKey {
                path: self.path().child(key),
            })
    }

    /// Follow `path` down from this node; the empty path is this node
    pub fn lookup(&self, path: &Path) -> Option<Entry> {
        let mut current = Entry::Branch(self.clone());
        for key in path.iter() {
            current = current.as_branch()?.get(key)?;
        }
        Some(current)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Keys of this node, sorted
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Snapshot of the entries of this node, sorted by key
    pub fn entries(&self) -> Vec<(String, Entry)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// JSON snapshot of the whole subtree
    pub fn to_value(&self) -> Value {
        let entries = self.inner.entries.read();
        Value::Object(
            entries
                .iter()
                .map(|(k, e)| (k.clone(), e.to_value()))
                .collect(),
        )
    }

    // === Writes ===

    /// Assign `value` to `key`
    ///
    /// JSON objects become child nodes, recursively. Assigning `null`
    /// removes the key if it is present.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        match value.into() {
            Value::Null => {
                self.discard(key);
            }
            value => {
                let entry = self.wrap(key, value);
                self.insert_entry(key, entry);
            }
        }
    }

    /// Assign every entry of `entries`
    pub fn update(&self, entries: &Map<String, Value>) {
        for (key, value) in entries {
            self.set(key, value.clone());
        }
    }

    fn update_owned(&self, entries: Map<String, Value>) {
        for (key, value) in entries {
            self.set(&key, value);
        }
    }

    /// Merge a sparse update into this subtree
    ///
    /// See [`crate::merge`]; `null` deletes, mappings recurse into existing
    /// branches, everything else overwrites.
    pub fn merge(&self, source: &Map<String, Value>) -> Result<&Self> {
        ops::merge(&mut self.clone(), source)?;
        Ok(self)
    }

    /// [`Node::merge`] for a JSON value, which must be an object
    pub fn merge_value(&self, source: &Value) -> Result<&Self> {
        match source {
            Value::Object(map) => self.merge(map),
            other => Err(Error::NotAMapping(type_name(other).to_string())),
        }
    }

    /// Remove `key`, failing if it is absent
    pub fn remove(&self, key: &str) -> Result<Entry> {
        self.take(key).ok_or_else(|| Error::MissingKey {
            path: self.path().child(key),
        })
    }

    fn discard(&self, key: &str) -> bool {
        self.take(key).is_some()
    }

    fn take(&self, key: &str) -> Option<Entry> {
        let old = self.inner.entries.write().remove(key)?;
        if let Entry::Branch(child) = &old {
            child.detach();
        }
        self.mark_replaced(key, Some(old.cycle_start_value()));
        Some(old)
    }

    /// Convert a non-null value into an entry; objects become children
    fn wrap(&self, key: &str, value: Value) -> Entry {
        match value {
            Value::Object(map) => Entry::Branch(self.adopt(key, map)),
            value => Entry::Leaf(value),
        }
    }

    /// Build a child for `key`, filling it before linking it to `self`
    fn adopt(&self, key: &str, entries: Map<String, Value>) -> Node {
        let child = Node::detached(Some(key.to_string()));
        child.update_owned(entries);
        child.attach(self);
        child
    }

    fn insert_entry(&self, key: &str, entry: Entry) {
        let old = self.inner.entries.write().insert(key.to_string(), entry);
        if let Some(Entry::Branch(child)) = &old {
            child.detach();
        }
        self.mark_replaced(key, old.map(|e| e.cycle_start_value()));
    }

    /// Child node at `key`, created empty if the key is absent
    ///
    /// Creating the child does not dirty anything. This lets observers be
    /// registered on parts of the tree that hold no data yet.
    pub fn branch(&self, key: &str) -> Result<Node> {
        let mut entries = self.inner.entries.write();
        match entries.get(key) {
            Some(Entry::Branch(child)) => Ok(child.clone()),
            Some(Entry::Leaf(_)) => Err(Error::NotABranch {
                path: self.path().child(key),
            }),
            None => {
                let child = Node::detached(Some(key.to_string()));
                child.attach(self);
                entries.insert(key.to_string(), Entry::Branch(child.clone()));
                Ok(child)
            }
        }
    }

    /// [`Node::branch`] applied along every key of `path`
    pub fn descend(&self, path: &Path) -> Result<Node> {
        path.iter()
            .try_fold(self.clone(), |node, key| node.branch(key))
    }

    // === Dirty tracking ===

    fn mark_replaced(&self, key: &str, old: Option<Value>) {
        {
            let mut state = self.inner.state.lock();
            match state.dirty.get_mut(key) {
                Some(pending @ Pending::Descendant) => *pending = Pending::Replaced(old),
                Some(Pending::Replaced(_)) => {}
                None => {
                    state.dirty.insert(key.to_string(), Pending::Replaced(old));
                }
            }
        }
        trace!(path = %self.path(), key, "dirty");
        self.propagate();
    }

    fn mark_descendant(&self, key: &str) {
        self.inner
            .state
            .lock()
            .dirty
            .entry(key.to_string())
            .or_insert(Pending::Descendant);
        self.propagate();
    }

    /// Mark this node's own key dirty in its parent, up to the root
    fn propagate(&self) {
        if let (Some(key), Some(parent)) = (self.key(), self.parent()) {
            parent.mark_descendant(key);
        }
    }

    /// Whether any key of this node awaits the next flush
    pub fn is_dirty(&self) -> bool {
        !self.inner.state.lock().dirty.is_empty()
    }

    /// JSON snapshot of this subtree with pending writes rolled back
    ///
    /// Used as the old value when a dirty branch is itself replaced, so the
    /// reported change starts from the state at the previous flush.
    fn cycle_start_value(&self) -> Value {
        let entries = self.inner.entries.read().clone();
        let dirty = self.inner.state.lock().dirty.clone();
        let mut snapshot: Map<String, Value> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.to_value()))
            .collect();
        for (key, pending) in dirty {
            match pending {
                Pending::Replaced(Some(old)) => {
                    snapshot.insert(key, old);
                }
                Pending::Replaced(None) => {
                    snapshot.remove(&key);
                }
                Pending::Descendant => {
                    if let Some(Entry::Branch(child)) = entries.get(&key) {
                        snapshot.insert(key, child.cycle_start_value());
                    }
                }
            }
        }
        Value::Object(snapshot)
    }

    /// Keys of this node that await the next flush
    pub fn dirty_keys(&self) -> Vec<String> {
        self.inner.state.lock().dirty.keys().cloned().collect()
    }

    // === Observers ===

    /// Register `observer` for changes at or below `key`
    pub fn observe(&self, key: &str, observer: impl Observer + 'static) -> ObserverId {
        let id = self
            .inner
            .state
            .lock()
            .observers
            .register(key, Arc::new(observer));
        debug!(path = %self.path(), key, id = %id, "observer registered");
        id
    }

    /// Remove a registration made with [`Node::observe`]
    pub fn unobserve(&self, key: &str, id: ObserverId) -> Result<()> {
        if !self.inner.state.lock().observers.unregister(key, id) {
            return Err(Error::UnregisteredObserver {
                key: key.to_string(),
                id,
            });
        }
        debug!(path = %self.path(), key, id = %id, "observer removed");
        Ok(())
    }

    /// Number of observers registered under `key`
    pub fn observer_count(&self, key: &str) -> usize {
        self.inner.state.lock().observers.count(key)
    }

    fn has_observers(&self) -> bool {
        !self.inner.state.lock().observers.is_empty()
    }

    // === Maintenance ===

    /// Remove descendant subtrees that hold no data and no observers
    ///
    /// Subtrees with changes not yet delivered by [`Node::notify`] are kept
    /// until a cleanup after the next flush.
    ///
    /// Returns `true` if this node itself is now empty and unobserved, so
    /// the caller may drop it too.
    ///
    /// Removed subtrees are detached. Handles to them that callers still
    /// hold keep working but are no longer part of the tree, so writes
    /// through them are never observed. Only call this when no such
    /// handles are in use.
    pub fn cleanup(&self) -> bool {
        let children: Vec<(String, Node)> = self
            .inner
            .entries
            .read()
            .iter()
            .filter_map(|(k, e)| e.as_branch().map(|n| (k.clone(), n.clone())))
            .collect();

        for (key, child) in children {
            // A dirty child still owes its observers a flush
            if !child.cleanup() || child.is_dirty() {
                continue;
            }
            let mut entries = self.inner.entries.write();
            let unchanged = matches!(entries.get(&key), Some(Entry::Branch(n)) if n.ptr_eq(&child));
            if unchanged && child.is_empty() && !child.has_observers() && !child.is_dirty() {
                entries.remove(&key);
                drop(entries);
                child.detach();
                self.forget_pending(&key);
                debug!(path = %self.path(), key = %key, "reclaimed empty subtree");
            }
        }

        self.is_empty() && !self.has_observers()
    }

    /// Drop a pending record that would only report an empty subtree
    fn forget_pending(&self, key: &str) {
        let mut state = self.inner.state.lock();
        if matches!(
            state.dirty.get(key),
            Some(Pending::Descendant) | Some(Pending::Replaced(None))
        ) {
            state.dirty.remove(key);
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::root()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path())
            .field("entries", &self.to_value())
            .finish()
    }
}

impl MergeTarget for Node {
    fn base_path(&self) -> Path {
        self.path()
    }

    fn contains_key(&self, key: &str) -> bool {
        Node::contains_key(self, key)
    }

    fn visit_child<R>(&self, key: &str, f: impl FnOnce(&Self) -> R) -> Option<R> {
        match self.get(key)? {
            Entry::Branch(child) => Some(f(&child)),
            Entry::Leaf(_) => None,
        }
    }

    fn with_child_mut<R>(&mut self, key: &str, f: impl FnOnce(&mut Self) -> R) -> Option<R> {
        match self.get(key)? {
            Entry::Branch(mut child) => Some(f(&mut child)),
            Entry::Leaf(_) => None,
        }
    }

    fn assign(&mut self, key: &str, value: &Value) {
        self.set(key, value.clone());
    }

    fn delete(&mut self, key: &str) -> bool {
        self.discard(key)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
