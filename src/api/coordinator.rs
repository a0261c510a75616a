//! Purpose: The single public entry point for reading and writing file labels.
//! Exports: `StateCoordinator`, `BatchResult`, `ApiResult`.
//! Role: Orchestrates resolver → cache → store and notifies subscribers.
//! Invariants: Reads never fail; store trouble on the read path is logged and reads as `None`.
//! Invariants: Durable write first, then cache, then notification; a failed write touches neither.
//! Invariants: Operations on one identity key are serialized; distinct keys proceed independently.
//! Invariants: The cache lock is never held across store I/O; callbacks run with no lock held.
//! Invariants: Changes are queued for subscribers under the key lock, in commit order.
#![allow(clippy::result_large_err)]

use std::collections::HashSet;
use std::sync::Arc;

use super::config::EngineConfig;
use super::subscription::{StateCallback, SubscriberRegistry, SubscriptionHandle};
use crate::core::cache::{CacheLookup, StateCache};
use crate::core::error::{Error, ErrorKind};
use crate::core::identity::{IdentityKey, IdentityResolver};
use crate::core::key_lock::KeyLocks;
use crate::core::label::Label;
use crate::core::lock::StoreLock;
use crate::core::store::{
    SqliteStateStore, StateRecord, StateStore, StateWrite, StoreOptions, UnavailableStore,
};

pub type ApiResult<T> = Result<T, Error>;

/// Outcome of `set_files_state`. Either every distinct path was committed or
/// none was.
#[derive(Debug)]
pub struct BatchResult {
    pub requested: usize,
    pub committed: usize,
    pub error: Option<Error>,
}

impl BatchResult {
    fn committed(requested: usize, committed: usize) -> Self {
        Self {
            requested,
            committed,
            error: None,
        }
    }

    fn failed(requested: usize, error: Error) -> Self {
        Self {
            requested,
            committed: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct StateCoordinator {
    store: Box<dyn StateStore>,
    cache: StateCache,
    resolver: IdentityResolver,
    key_locks: KeyLocks,
    subscribers: Arc<SubscriberRegistry>,
    degraded: bool,
    // Released last, after the store connection closes.
    _store_lock: Option<StoreLock>,
}

impl std::fmt::Debug for StateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCoordinator")
            .field("resolver", &self.resolver)
            .field("cached", &self.cache.len())
            .field("subscribers", &self.subscribers.len())
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl StateCoordinator {
    pub fn new(store: Box<dyn StateStore>, cache: StateCache, resolver: IdentityResolver) -> Self {
        Self {
            store,
            cache,
            resolver,
            key_locks: KeyLocks::new(),
            subscribers: Arc::new(SubscriberRegistry::default()),
            degraded: false,
            _store_lock: None,
        }
    }

    /// Takes exclusive ownership of the configured store file and opens it.
    pub fn open(config: &EngineConfig) -> ApiResult<Self> {
        let store_path = config.store_path();
        if let Some(parent) = store_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                let kind = match err.kind() {
                    std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                    _ => ErrorKind::StoreUnavailable,
                };
                Error::new(kind)
                    .with_message("failed to create state directory")
                    .with_path(parent)
                    .with_source(err)
            })?;
        }

        let lock = StoreLock::acquire(store_path, config.lock_mode())?;
        let store = SqliteStateStore::open(store_path, StoreOptions::new(config.busy_timeout()))?;
        let mut coordinator = Self::new(
            Box::new(store),
            StateCache::new(),
            IdentityResolver::new(config.path_policy()),
        );
        coordinator._store_lock = Some(lock);
        Ok(coordinator)
    }

    /// Like `open`, but an unusable store degrades to "no known state" instead
    /// of failing: reads return `None` and writes fail with `StoreUnavailable`.
    pub fn open_or_degraded(config: &EngineConfig) -> Self {
        match Self::open(config) {
            Ok(coordinator) => coordinator,
            Err(err) => {
                tracing::warn!(
                    path = %config.store_path().display(),
                    error = %err,
                    "state store unavailable; continuing without persisted state"
                );
                let mut coordinator = Self::new(
                    Box::new(UnavailableStore::new(err.to_string())),
                    StateCache::new(),
                    IdentityResolver::new(config.path_policy()),
                );
                coordinator.degraded = true;
                coordinator
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn get_file_state(&self, path: &str) -> Option<Label> {
        let key = match self.resolver.identity(path) {
            Ok(key) => key,
            Err(err) => {
                tracing::debug!(path, error = %err, "unresolvable path reads as untracked");
                return None;
            }
        };

        match self.cache.lookup(&key) {
            CacheLookup::Hit(label) => return Some(label),
            CacheLookup::Absent => return None,
            CacheLookup::Miss => {}
        }

        let _guard = self.key_locks.lock_one(&key);
        // A writer may have filled the entry while we waited for the key.
        match self.cache.lookup(&key) {
            CacheLookup::Hit(label) => return Some(label),
            CacheLookup::Absent => return None,
            CacheLookup::Miss => {}
        }

        match self.store.get(&key) {
            Ok(Some(StateRecord {
                label: Some(label), ..
            })) => {
                tracing::debug!(path, key = %key, "filled cache from store");
                self.cache.put(key, label.clone());
                Some(label)
            }
            Ok(_) => {
                self.cache.put_absent(key);
                None
            }
            Err(err) => {
                tracing::warn!(path, error = %err, "state read failed; treating as untracked");
                None
            }
        }
    }

    pub fn set_file_state(&self, path: &str, label: &str) -> ApiResult<()> {
        let label = Label::new(label)?;
        let key = self.resolve(path)?;

        {
            let _guard = self.key_locks.lock_one(&key);
            let write = StateWrite::new(key.clone(), path, Some(label.clone()));
            self.store.set(&write).inspect_err(|err| {
                tracing::warn!(path, error = %err, "state write failed");
            })?;
            self.cache.put(key, label.clone());
            self.subscribers.enqueue(path, Some(&label));
        }

        self.subscribers.dispatch();
        Ok(())
    }

    pub fn set_files_state<S: AsRef<str>>(&self, paths: &[S], label: &str) -> BatchResult {
        let requested = paths.len();
        let label = match Label::new(label) {
            Ok(label) => label,
            Err(err) => return BatchResult::failed(requested, err),
        };

        let mut seen = HashSet::with_capacity(requested);
        let mut writes = Vec::with_capacity(requested);
        for path in paths {
            let path = path.as_ref();
            let key = match self.resolve(path) {
                Ok(key) => key,
                Err(err) => return BatchResult::failed(requested, err),
            };
            if seen.insert(key.clone()) {
                writes.push(StateWrite::new(key, path, Some(label.clone())));
            }
        }
        if writes.is_empty() {
            return BatchResult::committed(requested, 0);
        }

        {
            let _guard = self.key_locks.lock_many(writes.iter().map(|write| &write.key));
            if let Err(err) = self.store.set_batch(&writes) {
                tracing::warn!(count = writes.len(), error = %err, "batch state write failed");
                return BatchResult::failed(requested, err);
            }
            for write in &writes {
                self.cache.put(write.key.clone(), label.clone());
                self.subscribers.enqueue(&write.path, Some(&label));
            }
        }

        self.subscribers.dispatch();
        BatchResult::committed(requested, writes.len())
    }

    /// Carries the label of `old_path` over to `new_path`. Returns whether a
    /// label was carried. Must be called after the on-disk move succeeded.
    pub fn rename(&self, old_path: &str, new_path: &str) -> ApiResult<bool> {
        let old_key = self.resolve(old_path)?;
        let new_key = self.resolve(new_path)?;

        let carried = {
            let _guard = self.key_locks.lock_many([&old_key, &new_key]);
            let outcome = self
                .store
                .rename(&old_key, &new_key, new_path)
                .inspect_err(|err| {
                    tracing::warn!(old_path, new_path, error = %err, "rename propagation failed");
                })?;
            self.cache.evict(&old_key);
            match &outcome.carried {
                Some(label) => self.cache.put(new_key.clone(), label.clone()),
                None => self.cache.evict(&new_key),
            }
            if old_key != new_key {
                if outcome.moved && outcome.carried.is_some() {
                    self.subscribers.enqueue(old_path, None);
                }
                if outcome.carried.is_some() || outcome.displaced {
                    self.subscribers.enqueue(new_path, outcome.carried.as_ref());
                }
            }
            outcome.carried.is_some()
        };

        self.subscribers.dispatch();
        Ok(carried)
    }

    /// Explicitly forgets `path`. Returns whether a record was removed.
    pub fn clear_file_state(&self, path: &str) -> ApiResult<bool> {
        let key = self.resolve(path)?;
        let removed = {
            let _guard = self.key_locks.lock_one(&key);
            let removed = self.store.delete(&key).inspect_err(|err| {
                tracing::warn!(path, error = %err, "state delete failed");
            })?;
            self.cache.evict(&key);
            if removed {
                self.subscribers.enqueue(path, None);
            }
            removed
        };
        self.subscribers.dispatch();
        Ok(removed)
    }

    /// Purges every record whose path is not in `existing_paths` and returns
    /// how many were removed, including on a partial failure.
    pub fn cleanup_missing_files<I>(&self, existing_paths: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let valid: HashSet<IdentityKey> = existing_paths
            .into_iter()
            .filter_map(|path| self.resolver.identity(path.as_ref()).ok())
            .collect();

        let outcome = {
            let _guard = self.key_locks.lock_all();
            let outcome = self.store.cleanup(&valid);
            for record in &outcome.removed {
                self.cache.evict(&record.key);
                if let Some(path) = &record.path {
                    self.subscribers.enqueue(path, None);
                }
            }
            outcome
        };

        if let Some(err) = &outcome.failure {
            tracing::warn!(
                removed = outcome.removed.len(),
                error = %err,
                "cleanup stopped before completion"
            );
        }
        self.subscribers.dispatch();
        outcome.removed.len()
    }

    pub fn tracked_files(&self) -> ApiResult<Vec<StateRecord>> {
        self.store.records()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, Option<&Label>) + Send + Sync + 'static,
    {
        let callback: Arc<StateCallback> = Arc::new(callback);
        self.subscribers.add(callback)
    }

    fn resolve(&self, path: &str) -> ApiResult<IdentityKey> {
        self.resolver.identity(path).map_err(|err| err.with_path(path))
    }
}
