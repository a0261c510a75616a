// Schema bootstrap and additive, versioned migrations for the state file.
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::sqlite::sql_error;
use crate::core::error::{Error, ErrorKind};

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: u32 = 2;

pub(super) fn bootstrap(conn: &mut Connection, path: Option<&Path>) -> Result<(), Error> {
    adopt_unversioned_store(conn, path)?;

    let current = current_version(conn, path)?;
    if current > SCHEMA_VERSION {
        let mut err = Error::new(ErrorKind::Schema)
            .with_message(format!(
                "store schema version {current} is newer than supported version {SCHEMA_VERSION}"
            ))
            .with_hint("Upgrade filestate or point it at a different store.");
        if let Some(path) = path {
            err = err.with_path(path);
        }
        return Err(err);
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        let tx = conn
            .transaction()
            .map_err(sql_error(path, "failed to start migration"))?;
        apply_migration(&tx, version, path)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![version],
        )
        .map_err(sql_error(path, "failed to record migration"))?;
        tx.commit()
            .map_err(sql_error(path, "failed to commit migration"))?;
        tracing::debug!(version, "applied state store migration");
    }

    Ok(())
}

pub(super) fn current_version(conn: &Connection, path: Option<&Path>) -> Result<u32, Error> {
    if !table_exists(conn, "schema_migrations", path)? {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(sql_error(path, "failed to read schema version"))
}

fn table_exists(conn: &Connection, name: &str, path: Option<&Path>) -> Result<bool, Error> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(sql_error(path, "failed to inspect store schema"))
}

/// Stores written before versioning carry `file_states` without
/// `schema_migrations`; they match version 1 and are adopted as such.
fn adopt_unversioned_store(conn: &Connection, path: Option<&Path>) -> Result<(), Error> {
    if table_exists(conn, "schema_migrations", path)? || !table_exists(conn, "file_states", path)? {
        return Ok(());
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        INSERT INTO schema_migrations (version, applied_at)
        VALUES (1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        ON CONFLICT(version) DO NOTHING;
        ",
    )
    .map_err(sql_error(path, "failed to adopt unversioned store"))?;
    tracing::info!("adopted unversioned state store as schema version 1");
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: u32, path: Option<&Path>) -> Result<(), Error> {
    let sql = match version {
        1 => {
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_states (
                identity_key TEXT PRIMARY KEY NOT NULL,
                label TEXT,
                updated_at TEXT NOT NULL
            );
            "
        }
        2 => {
            "
            ALTER TABLE file_states ADD COLUMN path TEXT;
            CREATE INDEX IF NOT EXISTS idx_file_states_label ON file_states(label);
            "
        }
        other => {
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!("no migration defined for schema version {other}")));
        }
    };
    tx.execute_batch(sql)
        .map_err(sql_error(path, "failed to apply migration"))
}

#[cfg(test)]
mod tests {
    use super::{SCHEMA_VERSION, bootstrap, current_version};
    use crate::core::error::ErrorKind;
    use rusqlite::Connection;

    #[test]
    fn bootstrap_is_idempotent() {
        let mut conn = Connection::open_in_memory().expect("open");
        bootstrap(&mut conn, None).expect("first bootstrap");
        bootstrap(&mut conn, None).expect("second bootstrap");
        assert_eq!(current_version(&conn, None).unwrap(), SCHEMA_VERSION);

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, SCHEMA_VERSION as i64);
    }

    #[test]
    fn unversioned_store_is_adopted_and_migrated() {
        let mut conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "
            CREATE TABLE file_states (
                identity_key TEXT PRIMARY KEY NOT NULL,
                label TEXT,
                updated_at TEXT NOT NULL
            );
            INSERT INTO file_states VALUES ('fsk-legacy', 'pending', '2025-01-01T00:00:00Z');
            ",
        )
        .unwrap();

        bootstrap(&mut conn, None).expect("bootstrap");
        assert_eq!(current_version(&conn, None).unwrap(), SCHEMA_VERSION);

        let (label, path): (String, Option<String>) = conn
            .query_row(
                "SELECT label, path FROM file_states WHERE identity_key = 'fsk-legacy'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(label, "pending");
        assert_eq!(path, None);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().expect("open");
        bootstrap(&mut conn, None).expect("bootstrap");
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, 'later')",
            [SCHEMA_VERSION + 1],
        )
        .unwrap();

        let err = bootstrap(&mut conn, None).expect_err("too new");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
