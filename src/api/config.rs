//! Purpose: Configuration for opening a coordinator against an on-disk store.
//! Exports: `EngineConfig`.
//! Role: Builder-style settings shared by the CLI and embedding applications.
//! Invariants: Defaults come from `store_paths`; nothing here touches the filesystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::identity::PathPolicy;
use crate::core::lock::LockMode;
use crate::store_paths::{default_state_dir, store_path_in};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    store_path: PathBuf,
    path_policy: PathPolicy,
    lock_mode: LockMode,
    busy_timeout: Duration,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            store_path: store_path_in(&default_state_dir()),
            path_policy: PathPolicy::native(),
            lock_mode: LockMode::FailFast,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Uses `state.db` inside `dir`.
    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.store_path = store_path_in(dir.as_ref());
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_path_policy(mut self, policy: PathPolicy) -> Self {
        self.path_policy = policy;
        self
    }

    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn path_policy(&self) -> PathPolicy {
        self.path_policy
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
