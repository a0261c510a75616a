// Stand-in store used when the real one cannot be opened: every call fails.
use std::collections::HashSet;

use super::{CleanupOutcome, RenameOutcome, StateRecord, StateStore, StateWrite};
use crate::core::error::{Error, ErrorKind};
use crate::core::identity::IdentityKey;

#[derive(Clone, Debug)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn error(&self) -> Error {
        Error::new(ErrorKind::StoreUnavailable).with_message(self.reason.clone())
    }
}

impl StateStore for UnavailableStore {
    fn get(&self, _key: &IdentityKey) -> Result<Option<StateRecord>, Error> {
        Err(self.error())
    }

    fn set(&self, _write: &StateWrite) -> Result<(), Error> {
        Err(self.error())
    }

    fn set_batch(&self, _writes: &[StateWrite]) -> Result<(), Error> {
        Err(self.error())
    }

    fn rename(
        &self,
        _old_key: &IdentityKey,
        _new_key: &IdentityKey,
        _new_path: &str,
    ) -> Result<RenameOutcome, Error> {
        Err(self.error())
    }

    fn delete(&self, _key: &IdentityKey) -> Result<bool, Error> {
        Err(self.error())
    }

    fn cleanup(&self, _valid_keys: &HashSet<IdentityKey>) -> CleanupOutcome {
        CleanupOutcome::failed(self.error())
    }

    fn records(&self) -> Result<Vec<StateRecord>, Error> {
        Err(self.error())
    }

    fn len(&self) -> Result<usize, Error> {
        Err(self.error())
    }
}
