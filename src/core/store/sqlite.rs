// SQLite-backed state store: one `file_states` table behind a mutex-guarded connection.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use super::schema;
use super::{CleanupOutcome, RenameOutcome, StateRecord, StateStore, StateWrite};
use crate::core::error::{Error, ErrorKind};
use crate::core::identity::IdentityKey;
use crate::core::label::Label;
use crate::core::timestamp::now_rfc3339;

/// Rows deleted per cleanup transaction.
const CLEANUP_CHUNK: usize = 256;

const UPSERT_SQL: &str = "
    INSERT INTO file_states (identity_key, path, label, updated_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(identity_key) DO UPDATE SET
        path = excluded.path,
        label = excluded.label,
        updated_at = excluded.updated_at
";

const SELECT_ONE_SQL: &str =
    "SELECT identity_key, path, label, updated_at FROM file_states WHERE identity_key = ?1";

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
}

impl StoreOptions {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SqliteStateStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStateStore {
    /// Opens (creating if needed) the store file and brings its schema up to date.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let mut conn = Connection::open(&path)
            .map_err(sql_error(Some(path.as_path()), "failed to open state store"))?;
        configure(&conn, Some(path.as_path()), options, true)?;
        schema::bootstrap(&mut conn, Some(path.as_path()))?;
        tracing::debug!(path = %path.display(), "opened state store");
        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let mut conn =
            Connection::open_in_memory().map_err(sql_error(None, "failed to open state store"))?;
        configure(&conn, None, StoreOptions::default(), false)?;
        schema::bootstrap(&mut conn, None)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32, Error> {
        let conn = self.lock();
        schema::current_version(&conn, self.path())
    }

    /// Runs SQLite's quick integrity check; an empty result means healthy.
    pub fn integrity_check(&self) -> Result<Vec<String>, Error> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("PRAGMA quick_check")
            .map_err(self.err("failed to run integrity check"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(self.err("failed to run integrity check"))?;
        let mut problems = Vec::new();
        for row in rows {
            let line = row.map_err(self.err("failed to read integrity check"))?;
            if line != "ok" {
                problems.push(line);
            }
        }
        Ok(problems)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // An unwinding holder drops its transaction, which rolls back.
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn err(&self, message: &'static str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
        sql_error(self.path(), message)
    }

    fn delete_chunk(&self, chunk: &[StateRecord]) -> Result<(), Error> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(self.err("failed to start cleanup transaction"))?;
        {
            let mut stmt = tx
                .prepare_cached("DELETE FROM file_states WHERE identity_key = ?1")
                .map_err(self.err("failed to prepare cleanup"))?;
            for record in chunk {
                stmt.execute(params![record.key.as_str()])
                    .map_err(self.err("failed to delete stale record"))?;
            }
        }
        tx.commit().map_err(self.err("failed to commit cleanup"))
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &IdentityKey) -> Result<Option<StateRecord>, Error> {
        let conn = self.lock();
        conn.query_row(SELECT_ONE_SQL, params![key.as_str()], map_row)
            .optional()
            .map_err(|err| self.err("failed to read state")(err).with_key(key.as_str()))
    }

    fn set(&self, write: &StateWrite) -> Result<(), Error> {
        let conn = self.lock();
        conn.execute(
            UPSERT_SQL,
            params![
                write.key.as_str(),
                write.path,
                write.label.as_ref().map(Label::as_str),
                now_rfc3339()
            ],
        )
        .map_err(|err| self.err("failed to write state")(err).with_key(write.key.as_str()))?;
        Ok(())
    }

    fn set_batch(&self, writes: &[StateWrite]) -> Result<(), Error> {
        if writes.is_empty() {
            return Ok(());
        }
        let updated_at = now_rfc3339();
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(self.err("failed to start batch transaction"))?;
        {
            let mut stmt = tx
                .prepare_cached(UPSERT_SQL)
                .map_err(self.err("failed to prepare batch write"))?;
            for write in writes {
                stmt.execute(params![
                    write.key.as_str(),
                    write.path,
                    write.label.as_ref().map(Label::as_str),
                    updated_at
                ])
                .map_err(|err| {
                    self.err("failed to write batch item")(err).with_key(write.key.as_str())
                })?;
            }
        }
        // Dropping `tx` on any error above rolls the whole batch back.
        tx.commit().map_err(self.err("failed to commit batch"))
    }

    fn rename(
        &self,
        old_key: &IdentityKey,
        new_key: &IdentityKey,
        new_path: &str,
    ) -> Result<RenameOutcome, Error> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(self.err("failed to start rename transaction"))?;

        let existing = tx
            .query_row(SELECT_ONE_SQL, params![old_key.as_str()], map_row)
            .optional()
            .map_err(|err| self.err("failed to read rename source")(err).with_key(old_key.as_str()))?;

        let outcome = if old_key == new_key {
            // Same identity (e.g. a case-only rename on a case-folding policy).
            tx.execute(
                "UPDATE file_states SET path = ?2 WHERE identity_key = ?1",
                params![old_key.as_str(), new_path],
            )
            .map_err(self.err("failed to refresh renamed path"))?;
            RenameOutcome {
                moved: existing.is_some(),
                carried: existing.and_then(|record| record.label),
                displaced: false,
            }
        } else {
            let displaced = tx
                .execute(
                    "DELETE FROM file_states WHERE identity_key = ?1",
                    params![new_key.as_str()],
                )
                .map_err(|err| {
                    self.err("failed to clear rename target")(err).with_key(new_key.as_str())
                })?
                > 0;
            match existing {
                Some(record) => {
                    tx.execute(
                        UPSERT_SQL,
                        params![
                            new_key.as_str(),
                            new_path,
                            record.label.as_ref().map(Label::as_str),
                            now_rfc3339()
                        ],
                    )
                    .map_err(|err| {
                        self.err("failed to write rename target")(err).with_key(new_key.as_str())
                    })?;
                    tx.execute(
                        "DELETE FROM file_states WHERE identity_key = ?1",
                        params![old_key.as_str()],
                    )
                    .map_err(|err| {
                        self.err("failed to remove rename source")(err).with_key(old_key.as_str())
                    })?;
                    RenameOutcome {
                        moved: true,
                        carried: record.label,
                        displaced,
                    }
                }
                None => RenameOutcome {
                    moved: false,
                    carried: None,
                    displaced,
                },
            }
        };

        tx.commit().map_err(self.err("failed to commit rename"))?;
        Ok(outcome)
    }

    fn delete(&self, key: &IdentityKey) -> Result<bool, Error> {
        let conn = self.lock();
        let removed = conn
            .execute(
                "DELETE FROM file_states WHERE identity_key = ?1",
                params![key.as_str()],
            )
            .map_err(|err| self.err("failed to delete state")(err).with_key(key.as_str()))?;
        Ok(removed > 0)
    }

    fn cleanup(&self, valid_keys: &HashSet<IdentityKey>) -> CleanupOutcome {
        let stale: Vec<StateRecord> = match self.records() {
            Ok(records) => records
                .into_iter()
                .filter(|record| !valid_keys.contains(&record.key))
                .collect(),
            Err(err) => return CleanupOutcome::failed(err),
        };

        let mut outcome = CleanupOutcome::default();
        for chunk in stale.chunks(CLEANUP_CHUNK) {
            if let Err(err) = self.delete_chunk(chunk) {
                outcome.failure = Some(err);
                break;
            }
            outcome.removed.extend_from_slice(chunk);
        }
        outcome
    }

    fn records(&self) -> Result<Vec<StateRecord>, Error> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT identity_key, path, label, updated_at FROM file_states
                 ORDER BY path, identity_key",
            )
            .map_err(self.err("failed to list state"))?;
        let rows = stmt
            .query_map([], map_row)
            .map_err(self.err("failed to list state"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(self.err("failed to read state row"))
    }

    fn len(&self) -> Result<usize, Error> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_states", [], |row| row.get(0))
            .map_err(self.err("failed to count state"))?;
        usize::try_from(count).map_err(|_| {
            Error::new(ErrorKind::Schema).with_message(format!("invalid record count {count}"))
        })
    }
}

fn configure(
    conn: &Connection,
    path: Option<&Path>,
    options: StoreOptions,
    on_disk: bool,
) -> Result<(), Error> {
    conn.busy_timeout(options.busy_timeout)
        .map_err(sql_error(path, "failed to set busy timeout"))?;
    if on_disk {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(sql_error(path, "failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sql_error(path, "failed to set synchronous mode"))?;
    }
    Ok(())
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRecord> {
    Ok(StateRecord {
        key: IdentityKey::from_stored(row.get(0)?),
        path: row.get(1)?,
        label: row.get::<_, Option<String>>(2)?.map(Label::from_stored),
        updated_at: row.get(3)?,
    })
}

pub(super) fn sql_error<'a>(
    path: Option<&'a Path>,
    message: &'static str,
) -> impl FnOnce(rusqlite::Error) -> Error + 'a {
    move |err| {
        let mut error = Error::new(sqlite_error_kind(&err)).with_message(message);
        if let Some(path) = path {
            error = error.with_path(path);
        }
        error.with_source(err)
    }
}

fn sqlite_error_kind(err: &rusqlite::Error) -> ErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => ErrorKind::Schema,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::Busy,
            ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::ReadOnly => ErrorKind::Permission,
            _ => ErrorKind::StoreUnavailable,
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => ErrorKind::Schema,
        _ => ErrorKind::StoreUnavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteStateStore, StoreOptions, sql_error, sqlite_error_kind};
    use crate::core::error::ErrorKind;
    use crate::core::identity::{IdentityKey, IdentityResolver, PathPolicy};
    use crate::core::label::Label;
    use crate::core::store::{SCHEMA_VERSION, StateStore, StateWrite};
    use std::collections::HashSet;
    use std::io::Write;

    fn key(path: &str) -> IdentityKey {
        IdentityResolver::new(PathPolicy::posix())
            .identity(path)
            .expect("key")
    }

    fn write(path: &str, label: &str) -> StateWrite {
        StateWrite::new(key(path), path, Some(Label::new(label).unwrap()))
    }

    fn label_of(store: &SqliteStateStore, path: &str) -> Option<String> {
        store
            .get(&key(path))
            .expect("get")
            .and_then(|record| record.label)
            .map(Label::into_string)
    }

    fn poison_inserts(store: &SqliteStateStore, poison_path: &str) {
        let sql = format!(
            "CREATE TRIGGER poison BEFORE INSERT ON file_states
             WHEN NEW.path = '{poison_path}'
             BEGIN SELECT RAISE(ABORT, 'poisoned write'); END;"
        );
        store.lock().execute_batch(&sql).expect("trigger");
    }

    #[test]
    fn open_is_idempotent_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        {
            let store = SqliteStateStore::open(&path, StoreOptions::default()).expect("open");
            store.set(&write("/docs/report.txt", "pending")).expect("set");
        }
        let store = SqliteStateStore::open(&path, StoreOptions::default()).expect("reopen");
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(label_of(&store, "/docs/report.txt").as_deref(), Some("pending"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        assert!(store.get(&key("/nothing")).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn set_is_an_upsert() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/a", "pending")).unwrap();
        store.set(&write("/a", "pending")).unwrap();
        store.set(&write("/a", "reviewed")).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(label_of(&store, "/a").as_deref(), Some("reviewed"));

        let record = store.get(&key("/a")).unwrap().expect("record");
        assert_eq!(record.path.as_deref(), Some("/a"));
        assert!(record.updated_at.ends_with('Z'));
    }

    #[test]
    fn batch_commits_every_item() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        let writes = vec![write("/p1", "reviewed"), write("/p2", "reviewed"), write("/p3", "reviewed")];
        store.set_batch(&writes).expect("batch");
        for path in ["/p1", "/p2", "/p3"] {
            assert_eq!(label_of(&store, path).as_deref(), Some("reviewed"));
        }
    }

    #[test]
    fn failed_batch_applies_nothing() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/p1", "pending")).unwrap();
        poison_inserts(&store, "/p3");

        let writes = vec![write("/p1", "reviewed"), write("/p2", "reviewed"), write("/p3", "reviewed")];
        store.set_batch(&writes).expect_err("poisoned batch");

        assert_eq!(label_of(&store, "/p1").as_deref(), Some("pending"));
        assert_eq!(label_of(&store, "/p2"), None);
        assert_eq!(label_of(&store, "/p3"), None);
    }

    #[test]
    fn rename_moves_label() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/docs/report.txt", "pending")).unwrap();

        let outcome = store
            .rename(&key("/docs/report.txt"), &key("/docs/final.txt"), "/docs/final.txt")
            .expect("rename");
        assert!(outcome.moved);
        assert_eq!(outcome.carried.as_ref().map(Label::as_str), Some("pending"));
        assert!(!outcome.displaced);

        assert_eq!(label_of(&store, "/docs/report.txt"), None);
        assert_eq!(label_of(&store, "/docs/final.txt").as_deref(), Some("pending"));
        let record = store.get(&key("/docs/final.txt")).unwrap().unwrap();
        assert_eq!(record.path.as_deref(), Some("/docs/final.txt"));
    }

    #[test]
    fn rename_over_tracked_target_replaces_it() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/a", "pending")).unwrap();
        store.set(&write("/b", "corrected")).unwrap();

        let outcome = store.rename(&key("/a"), &key("/b"), "/b").expect("rename");
        assert!(outcome.displaced);
        assert_eq!(label_of(&store, "/b").as_deref(), Some("pending"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn rename_of_untracked_source_clears_target() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/b", "corrected")).unwrap();

        let outcome = store.rename(&key("/a"), &key("/b"), "/b").expect("rename");
        assert!(!outcome.moved);
        assert!(outcome.displaced);
        assert_eq!(label_of(&store, "/b"), None);
    }

    #[test]
    fn failed_rename_leaves_both_keys_untouched() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/a", "pending")).unwrap();
        poison_inserts(&store, "/b");

        store.rename(&key("/a"), &key("/b"), "/b").expect_err("poisoned");
        assert_eq!(label_of(&store, "/a").as_deref(), Some("pending"));
        assert_eq!(label_of(&store, "/b"), None);
    }

    #[test]
    fn delete_is_a_noop_when_absent() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        assert!(!store.delete(&key("/a")).unwrap());
        store.set(&write("/a", "pending")).unwrap();
        assert!(store.delete(&key("/a")).unwrap());
        assert_eq!(label_of(&store, "/a"), None);
    }

    #[test]
    fn cleanup_removes_only_unlisted_keys() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store.set(&write("/docs/final.txt", "pending")).unwrap();
        store.set(&write("/docs/old.txt", "stale")).unwrap();

        let valid: HashSet<_> = [key("/docs/final.txt")].into_iter().collect();
        let outcome = store.cleanup(&valid);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].path.as_deref(), Some("/docs/old.txt"));

        assert_eq!(label_of(&store, "/docs/final.txt").as_deref(), Some("pending"));
        assert_eq!(label_of(&store, "/docs/old.txt"), None);
    }

    #[test]
    fn cleanup_spans_multiple_chunks() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        let writes: Vec<_> = (0..600)
            .map(|i| write(&format!("/bulk/{i}"), "x"))
            .collect();
        store.set_batch(&writes).unwrap();

        let outcome = store.cleanup(&HashSet::new());
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.removed.len(), 600);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn garbage_file_is_a_schema_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(&[0x5a; 8192]).expect("write");
        drop(file);

        let err = SqliteStateStore::open(&path, StoreOptions::default()).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn integrity_check_passes_on_fresh_store() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        assert!(store.integrity_check().unwrap().is_empty());
    }

    #[test]
    fn sqlite_codes_map_to_kinds() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert_eq!(sqlite_error_kind(&busy), ErrorKind::Busy);

        let corrupt = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        );
        assert_eq!(sqlite_error_kind(&corrupt), ErrorKind::Schema);

        let io = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            None,
        );
        assert_eq!(sqlite_error_kind(&io), ErrorKind::StoreUnavailable);

        assert_eq!(
            sqlite_error_kind(&rusqlite::Error::QueryReturnedNoRows),
            ErrorKind::StoreUnavailable
        );
    }

    #[test]
    fn sql_error_keeps_message_path_and_source() {
        let path = std::path::PathBuf::from("/var/state/state.db");
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = sql_error(Some(&path), "failed to write state")(busy);
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(err.message(), Some("failed to write state"));
        assert_eq!(err.path(), Some(path.as_path()));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn failed_write_on_file_store_names_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        let store = SqliteStateStore::open(&path, StoreOptions::default()).expect("open");
        poison_inserts(&store, "/p1");

        let err = store.set(&write("/p1", "pending")).expect_err("poisoned write");
        assert_eq!(err.path(), Some(path.as_path()));
        assert!(err.message().is_some());
    }
}
