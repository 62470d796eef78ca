//! Notification pass: deliver pending changes to observers

use super::node::{Entry, Node, Pending};
use super::observer::Observer;
use crate::model::{Change, Path};
use std::sync::Arc;
use tracing::debug;

impl Node {
    /// Deliver every change made below this node since the last flush
    ///
    /// Walks the dirty keys depth-first. Observers of a descendant run
    /// before observers of its ancestors for the same change. Each observer
    /// registered under a key receives every change reported for that key:
    /// the changed leaves below it, or a single change for the key itself
    /// when it was reassigned or removed.
    ///
    /// Dirty keys are cleared as they are taken, so a second flush with no
    /// new mutations delivers nothing. Mutations made while the pass runs
    /// (including from observers) are delivered by the next flush.
    ///
    /// Returns the changes reported at this node's level.
    pub fn notify(&self) -> Vec<Change> {
        let base = self.path();
        self.flush(&base)
    }

    fn flush(&self, base: &Path) -> Vec<Change> {
        let pending: Vec<(String, Pending, Vec<Arc<dyn Observer>>)> = {
            let mut state = self.inner.state.lock();
            let dirty = std::mem::take(&mut state.dirty);
            dirty
                .into_iter()
                .map(|(key, pending)| {
                    let observers = state.observers.observers_for(&key);
                    (key, pending, observers)
                })
                .collect()
        };
        if pending.is_empty() {
            return Vec::new();
        }
        debug!(path = %base, keys = pending.len(), "notifying");

        let mut reported = Vec::new();
        for (key, pending, observers) in pending {
            let changes = self.changes_for(base, &key, pending);
            for change in &changes {
                for observer in &observers {
                    observer.on_change(change);
                }
            }
            reported.extend(changes);
        }
        reported
    }

    fn changes_for(&self, base: &Path, key: &str, pending: Pending) -> Vec<Change> {
        let path = base.child(key);
        let single = |old: Option<serde_json::Value>, new: Option<serde_json::Value>| Change {
            path: path.clone(),
            relative: Path::from([key]),
            old,
            new,
        };

        match (self.get(key), pending) {
            (Some(Entry::Branch(child)), Pending::Descendant) => child
                .flush(&path)
                .into_iter()
                .map(|mut change| {
                    change.relative.prepend(key);
                    change
                })
                .collect(),
            (Some(Entry::Branch(child)), Pending::Replaced(old)) => {
                // Let observers inside the new subtree see their keys, then
                // report the replacement as one change at this level.
                child.flush(&path);
                vec![single(old, Some(child.to_value()))]
            }
            (Some(Entry::Leaf(value)), pending) => vec![single(pending.into_old(), Some(value))],
            (None, pending) => match pending.into_old() {
                Some(old) => vec![single(Some(old), None)],
                None => Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Change, ChangeKind, Path};
    use crate::Node;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<Change>>>, impl Fn(&Change) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |change: &Change| sink.lock().push(change.clone()))
    }

    #[test]
    fn test_leaf_change_reported() {
        let root = Node::from_value(json!({"a": {"b": 1}})).unwrap();
        root.notify();

        let (seen, observer) = recorder();
        root.observe("a", observer);
        root.branch("a").unwrap().set("b", 2);

        let reported = root.notify();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].path, Path::from(["a", "b"]));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].relative, Path::from(["a", "b"]));
        assert_eq!(seen[0].old, Some(json!(1)));
        assert_eq!(seen[0].new, Some(json!(2)));
        assert_eq!(seen[0].kind(), ChangeKind::Modified);
    }

    #[test]
    fn test_second_flush_is_empty() {
        let root = Node::root();
        let (seen, observer) = recorder();
        root.observe("k", observer);
        root.set("k", "v");

        assert_eq!(root.notify().len(), 1);
        assert!(root.notify().is_empty());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_old_value_is_first_in_cycle() {
        let root = Node::from_value(json!({"k": 1})).unwrap();
        root.notify();
        root.set("k", 2);
        root.set("k", 3);

        let reported = root.notify();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].old, Some(json!(1)));
        assert_eq!(reported[0].new, Some(json!(3)));
    }

    #[test]
    fn test_replaced_dirty_branch_reports_previous_flush_state() {
        let root = Node::from_value(json!({"a": {"b": 1}})).unwrap();
        root.notify();

        root.branch("a").unwrap().set("b", 2);
        root.set("a", 5);

        let reported = root.notify();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].old, Some(json!({"b": 1})));
        assert_eq!(reported[0].new, Some(json!(5)));
    }

    #[test]
    fn test_removed_branch_rolls_back_nested_writes() {
        let root = Node::from_value(json!({"a": {"b": 1, "c": {"d": 1}}})).unwrap();
        root.notify();

        let a = root.branch("a").unwrap();
        a.set("x", 1);
        a.remove("b").unwrap();
        a.branch("c").unwrap().set("d", 2);
        a.branch("c").unwrap().set("e", 3);
        root.remove("a").unwrap();

        let reported = root.notify();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].old, Some(json!({"b": 1, "c": {"d": 1}})));
        assert_eq!(reported[0].new, None);
    }

    #[test]
    fn test_removal_reported() {
        let root = Node::from_value(json!({"k": {"x": 1}})).unwrap();
        root.notify();
        let (seen, observer) = recorder();
        root.observe("k", observer);

        root.remove("k").unwrap();
        root.notify();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), ChangeKind::Removed);
        assert_eq!(seen[0].old, Some(json!({"x": 1})));
    }

    #[test]
    fn test_add_then_remove_reports_nothing() {
        let root = Node::root();
        root.set("tmp", 1);
        root.remove("tmp").unwrap();
        assert!(root.notify().is_empty());
    }

    #[test]
    fn test_replaced_subtree_reported_once() {
        let root = Node::from_value(json!({"s1": "flat"})).unwrap();
        root.notify();
        let (seen, observer) = recorder();
        root.observe("s1", observer);

        root.set("s1", json!({"type": "sensor", "rate": 10}));
        root.notify();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].old, Some(json!("flat")));
        assert_eq!(seen[0].new, Some(json!({"type": "sensor", "rate": 10})));
    }

    #[test]
    fn test_observer_may_mutate_tree() {
        let root = Node::root();
        let handle = root.clone();
        root.observe("input", move |change: &Change| {
            handle.set("echo", change.new.clone().unwrap_or_default());
        });
        root.set("input", 7);

        let first = root.notify();
        assert_eq!(first.len(), 1);
        assert_eq!(root.value("echo").unwrap(), json!(7));

        let second = root.notify();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].path, Path::from(["echo"]));
    }

    #[test]
    fn test_notify_on_subtree_uses_full_paths() {
        let root = Node::from_value(json!({"m1": {"meta": {"min": 0.0}}})).unwrap();
        root.notify();

        let m1 = root.branch("m1").unwrap();
        m1.merge_value(&json!({"meta": {"min": -1.0}})).unwrap();

        let reported = m1.notify();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].path, Path::from(["m1", "meta", "min"]));
        assert_eq!(reported[0].relative, Path::from(["meta", "min"]));
    }
}
