//! Purpose: Register change listeners and fan out state-change notifications.
//! Exports: `SubscriptionHandle`, `StateCallback`.
//! Role: Observer side of the coordinator; invoked only after durable success.
//! Invariants: Changes are queued while the writer still holds the key lock, so
//! delivery order matches commit order for each key.
//! Invariants: Callbacks run outside every engine lock, so they may call back in.
//! Invariants: A panicking callback is contained and logged; others still run.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::core::label::Label;

/// `(path, label)`; `None` means the path is no longer tracked.
pub type StateCallback = dyn Fn(&str, Option<&Label>) + Send + Sync;

struct Change {
    path: String,
    label: Option<Label>,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Change>,
    // Set while some thread is delivering the queue.
    draining: bool,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Arc<StateCallback>)>>,
    outbox: Mutex<Outbox>,
}

impl SubscriberRegistry {
    pub(crate) fn add(self: &Arc<Self>, callback: Arc<StateCallback>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, callback));
        SubscriptionHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Records a committed change. Call while the key lock is still held.
    pub(crate) fn enqueue(&self, path: &str, label: Option<&Label>) {
        self.outbox().queue.push_back(Change {
            path: path.to_string(),
            label: label.cloned(),
        });
    }

    /// Delivers queued changes in order. Call with no engine lock held. If
    /// another call is already delivering, it picks up our changes and this
    /// returns at once; that includes a callback writing back into the engine.
    pub(crate) fn dispatch(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let change = {
                let mut outbox = self.outbox();
                match outbox.queue.pop_front() {
                    Some(change) => change,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.notify(&change.path, change.label.as_ref());
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, path: &str, label: Option<&Label>) {
        let snapshot: Vec<Arc<StateCallback>> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(path, label))).is_err() {
                tracing::error!(path, "state subscriber panicked; notification dropped");
            }
        }
    }
}

/// Returned by `subscribe`. Dropping the handle keeps the subscription alive;
/// call `unsubscribe` to stop receiving notifications.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns false when the coordinator is already gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::SubscriberRegistry;
    use crate::core::label::Label;
    use std::sync::{Arc, Mutex};

    #[test]
    fn notify_reaches_every_subscriber() {
        let registry = Arc::new(SubscriberRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            registry.add(Arc::new(move |path: &str, label: Option<&Label>| {
                seen.lock()
                    .unwrap()
                    .push((path.to_string(), label.map(|l| l.to_string())));
            }));
        }

        let label = Label::new("pending").unwrap();
        registry.notify("/a", Some(&label));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("/a".to_string(), Some("pending".to_string())));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = Arc::new(SubscriberRegistry::default());
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let handle = registry.add(Arc::new(move |_: &str, _: Option<&Label>| {
            *counter.lock().unwrap() += 1;
        }));

        registry.notify("/a", None);
        assert!(handle.unsubscribe());
        registry.notify("/a", None);
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let registry = Arc::new(SubscriberRegistry::default());
        let reached = Arc::new(Mutex::new(false));
        registry.add(Arc::new(|_: &str, _: Option<&Label>| -> () { panic!("boom") }));
        let flag = Arc::clone(&reached);
        registry.add(Arc::new(move |_: &str, _: Option<&Label>| {
            *flag.lock().unwrap() = true;
        }));

        registry.notify("/a", None);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn dispatch_delivers_queued_changes_in_order() {
        let registry = Arc::new(SubscriberRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.add(Arc::new(move |_: &str, label: Option<&Label>| {
            sink.lock().unwrap().push(label.map(|l| l.to_string()));
        }));

        registry.enqueue("/a", Some(&Label::new("x").unwrap()));
        registry.enqueue("/a", None);
        registry.enqueue("/a", Some(&Label::new("y").unwrap()));
        registry.dispatch();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("x".to_string()), None, Some("y".to_string())]
        );
        registry.dispatch();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let registry = Arc::new(SubscriberRegistry::default());
        let handle = registry.add(Arc::new(|_: &str, _: Option<&Label>| {}));
        drop(registry);
        assert!(!handle.unsubscribe());
    }
}
