//! Purpose: In-memory mirror of durable file state for low-latency repeat reads.
//! Exports: `StateCache`, `CacheLookup`.
//! Role: Shared by all coordinator calls; the coordinator decides when to fill it.
//! Invariants: No time-based expiry; entries change only through explicit calls.
//! Invariants: Absence entries are capped and dropped oldest first; labels are not.
//! Invariants: The map lock is held for a single map access, never across I/O.
//! Invariants: A poisoned lock is recovered, not propagated as a panic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::core::identity::IdentityKey;
use crate::core::label::Label;

/// Absence entries kept before the oldest ones are dropped.
pub const DEFAULT_MAX_ABSENT: usize = 4096;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheLookup {
    Hit(Label),
    /// The store was consulted and holds no label for the key.
    Absent,
    Miss,
}

#[derive(Debug, Default)]
struct Entries {
    labels: HashMap<IdentityKey, Label>,
    absent: HashSet<IdentityKey>,
    // Insertion order of `absent`; may hold keys that have since been labeled.
    absent_order: VecDeque<IdentityKey>,
}

#[derive(Debug)]
pub struct StateCache {
    entries: Mutex<Entries>,
    max_absent: usize,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::with_max_absent(DEFAULT_MAX_ABSENT)
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels are unbounded; absence entries beyond `max_absent` are dropped
    /// oldest first and read as misses again. Zero disables absence caching.
    pub fn with_max_absent(max_absent: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            max_absent,
        }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<Label> {
        match self.lookup(key) {
            CacheLookup::Hit(label) => Some(label),
            CacheLookup::Absent | CacheLookup::Miss => None,
        }
    }

    pub fn lookup(&self, key: &IdentityKey) -> CacheLookup {
        let entries = self.lock();
        if let Some(label) = entries.labels.get(key) {
            CacheLookup::Hit(label.clone())
        } else if entries.absent.contains(key) {
            CacheLookup::Absent
        } else {
            CacheLookup::Miss
        }
    }

    pub fn put(&self, key: IdentityKey, label: Label) {
        let mut entries = self.lock();
        entries.absent.remove(&key);
        entries.labels.insert(key, label);
    }

    pub fn put_absent(&self, key: IdentityKey) {
        if self.max_absent == 0 {
            self.evict(&key);
            return;
        }
        let mut entries = self.lock();
        entries.labels.remove(&key);
        if entries.absent.insert(key.clone()) {
            entries.absent_order.push_back(key);
        }
        while entries.absent.len() > self.max_absent {
            match entries.absent_order.pop_front() {
                Some(oldest) => {
                    entries.absent.remove(&oldest);
                }
                None => break,
            }
        }
        if entries.absent_order.len() > self.max_absent.saturating_mul(2) {
            let Entries {
                absent,
                absent_order,
                ..
            } = &mut *entries;
            absent_order.retain(|key| absent.contains(key));
        }
    }

    pub fn evict(&self, key: &IdentityKey) {
        let mut entries = self.lock();
        entries.labels.remove(key);
        entries.absent.remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.labels.clear();
        entries.absent.clear();
        entries.absent_order.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.lock();
        entries.labels.len() + entries.absent.len()
    }

    pub fn absent_len(&self) -> usize {
        self.lock().absent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // Map operations cannot leave the map half-updated, so a poisoned
        // guard is still consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
