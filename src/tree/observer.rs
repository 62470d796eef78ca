//! Observer callbacks and the per-node observer registry

use crate::model::Change;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receiver of change notifications
///
/// Any `Fn(&Change) + Send + Sync` closure is an observer. Callbacks run
/// synchronously inside [`crate::Node::notify`] with no tree lock held, so
/// they may read or mutate the tree; mutations made from a callback are
/// delivered on the next flush.
pub trait Observer: Send + Sync {
    fn on_change(&self, change: &Change);
}

impl<F> Observer for F
where
    F: Fn(&Change) + Send + Sync,
{
    fn on_change(&self, change: &Change) {
        self(change)
    }
}

/// Token identifying one observer registration
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ObserverId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverId({})", self.0)
    }
}

struct Registration {
    id: ObserverId,
    observer: Arc<dyn Observer>,
}

/// Observers of one node, indexed by the key they watch
///
/// Keys with no remaining observers are dropped so that an empty registry
/// means the node holds no observers at all.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    by_key: BTreeMap<String, Vec<Registration>>,
}

impl ObserverRegistry {
    pub(crate) fn register(&mut self, key: &str, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId::next();
        self.by_key
            .entry(key.to_string())
            .or_default()
            .push(Registration { id, observer });
        id
    }

    /// Remove a registration, returning `false` if `id` is not registered under `key`
    pub(crate) fn unregister(&mut self, key: &str, id: ObserverId) -> bool {
        let Some(registrations) = self.by_key.get_mut(key) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            self.by_key.remove(key);
        }
        removed
    }

    /// Snapshot of the observers watching `key`, in registration order
    pub(crate) fn observers_for(&self, key: &str) -> Vec<Arc<dyn Observer>> {
        self.by_key
            .get(key)
            .map(|regs| regs.iter().map(|r| Arc::clone(&r.observer)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, key: &str) -> usize {
        self.by_key.get(key).map_or(0, Vec::len)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
