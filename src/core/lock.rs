// Exclusive advisory ownership of a store file through a sidecar lock file.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Fail with `ErrorKind::Busy` when another owner holds the store.
    FailFast,
    /// Block until the current owner releases the store.
    Wait,
}

/// Held for as long as a coordinator owns the store; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    file: File,
}

impl StoreLock {
    pub fn acquire(store_path: &Path, mode: LockMode) -> Result<Self, Error> {
        let path = lock_path_for(store_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to open store lock file")
                    .with_path(&path)
                    .with_source(err)
            })?;

        let locked = match mode {
            LockMode::FailFast => file.try_lock_exclusive(),
            LockMode::Wait => file.lock_exclusive(),
        };
        locked.map_err(|err| {
            let kind = lock_error_kind(&err);
            let mut error = Error::new(kind).with_path(&path).with_source(err);
            if kind == ErrorKind::Busy {
                error = error
                    .with_message("state store is owned by another process")
                    .with_hint("Close the other instance or retry with --wait.");
            }
            error
        })?;

        tracing::debug!(path = %path.display(), "acquired store lock");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                ErrorKind::Busy
            } else {
                ErrorKind::StoreUnavailable
            }
        }
    }
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::StoreUnavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::{LockMode, StoreLock, lock_path_for};
    use crate::core::error::ErrorKind;
    use std::path::Path;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/data/state.db")),
            Path::new("/data/state.db.lock")
        );
    }

    #[test]
    fn second_owner_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("state.db");
        let first = StoreLock::acquire(&store, LockMode::FailFast).expect("first lock");
        let err = StoreLock::acquire(&store, LockMode::FailFast).expect_err("contended");
        assert_eq!(err.kind(), ErrorKind::Busy);

        drop(first);
        StoreLock::acquire(&store, LockMode::FailFast).expect("relock after release");
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::StoreUnavailable);
    }
}
