// Striped per-key mutexes that serialize operations on the same identity key.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::core::identity::IdentityKey;

const DEFAULT_STRIPES: usize = 64;

#[derive(Debug)]
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

/// Holds one or more stripes; all are released together on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    pub fn with_stripes(count: usize) -> Self {
        let count = count.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock_one(&self, key: &IdentityKey) -> KeyGuard<'_> {
        self.lock_stripes(vec![self.stripe_of(key)])
    }

    /// Locks every stripe the keys map to, in ascending order, so concurrent
    /// multi-key callers cannot deadlock against each other.
    pub fn lock_many<'k>(&self, keys: impl IntoIterator<Item = &'k IdentityKey>) -> KeyGuard<'_> {
        let mut indices: Vec<usize> = keys.into_iter().map(|key| self.stripe_of(key)).collect();
        indices.sort_unstable();
        indices.dedup();
        self.lock_stripes(indices)
    }

    pub fn lock_all(&self) -> KeyGuard<'_> {
        self.lock_stripes((0..self.stripes.len()).collect())
    }

    fn stripe_of(&self, key: &IdentityKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    fn lock_stripes(&self, indices: Vec<usize>) -> KeyGuard<'_> {
        let guards = indices
            .into_iter()
            .map(|index| {
                self.stripes[index]
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
            })
            .collect();
        KeyGuard { _guards: guards }
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}
