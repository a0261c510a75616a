//! Purpose: Durable identity-key → label table and the trait the coordinator depends on.
//! Exports: `StateStore`, `StateRecord`, `StateWrite`, `RenameOutcome`, `CleanupOutcome`,
//! `SqliteStateStore`, `StoreOptions`, `UnavailableStore`, `SCHEMA_VERSION`.
//! Role: Persistence layer; the only code that touches the on-disk state file.
//! Invariants: At most one record per identity key; every write is an upsert.
//! Invariants: Batch writes and renames are single transactions (all-or-nothing).
//! Invariants: Failures surface as typed `Error`s; nothing here panics on bad data.

mod schema;
mod sqlite;
mod unavailable;

use std::collections::HashSet;

use serde::Serialize;

use crate::core::error::Error;
use crate::core::identity::IdentityKey;
use crate::core::label::Label;

pub use schema::SCHEMA_VERSION;
pub use sqlite::{SqliteStateStore, StoreOptions};
pub use unavailable::UnavailableStore;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StateRecord {
    pub key: IdentityKey,
    /// Display path last written for this key; stores migrated from v1 may lack it.
    pub path: Option<String>,
    pub label: Option<Label>,
    /// RFC 3339, UTC.
    pub updated_at: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateWrite {
    pub key: IdentityKey,
    pub path: String,
    pub label: Option<Label>,
}

impl StateWrite {
    pub fn new(key: IdentityKey, path: impl Into<String>, label: Option<Label>) -> Self {
        Self {
            key,
            path: path.into(),
            label,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RenameOutcome {
    /// A record existed under the old key and now lives under the new key.
    pub moved: bool,
    pub carried: Option<Label>,
    /// A record previously held by the new key was dropped.
    pub displaced: bool,
}

/// Cleanup removes in chunks; `failure` reports the first error after which
/// it stopped, with `removed` listing everything already committed.
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub removed: Vec<StateRecord>,
    pub failure: Option<Error>,
}

impl CleanupOutcome {
    pub fn failed(err: Error) -> Self {
        Self {
            removed: Vec::new(),
            failure: Some(err),
        }
    }
}

pub trait StateStore: Send + Sync {
    fn get(&self, key: &IdentityKey) -> Result<Option<StateRecord>, Error>;

    fn set(&self, write: &StateWrite) -> Result<(), Error>;

    fn set_batch(&self, writes: &[StateWrite]) -> Result<(), Error>;

    fn rename(
        &self,
        old_key: &IdentityKey,
        new_key: &IdentityKey,
        new_path: &str,
    ) -> Result<RenameOutcome, Error>;

    /// Returns whether a record was removed.
    fn delete(&self, key: &IdentityKey) -> Result<bool, Error>;

    fn cleanup(&self, valid_keys: &HashSet<IdentityKey>) -> CleanupOutcome;

    fn records(&self) -> Result<Vec<StateRecord>, Error>;

    fn len(&self) -> Result<usize, Error>;

    fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }
}
