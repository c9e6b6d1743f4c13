//! SQLite store for books, tasks, time entries and running timers.
//!
//! Every operation runs through [`Store::read`] or [`Store::write`], which
//! retry transient failures (busy or locked database, I/O hiccups) a bounded
//! number of times before giving up with [`Error::Storage`]. Writes run in an
//! immediate transaction, so concurrent sessions serialize on the database
//! lock and a failed attempt leaves nothing behind.

use std::path::Path;
use std::thread;
use std::time::Duration;

use rusqlite::{types::Type, Connection, TransactionBehavior};

use crate::error::{Error, Result};

pub const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS books (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    board       TEXT,
    archived    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS books_active_name ON books (name) WHERE archived = 0;

CREATE TABLE IF NOT EXISTS tasks (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id           INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    stage             TEXT NOT NULL,
    user_name         TEXT,
    estimate_seconds  INTEGER CHECK (estimate_seconds IS NULL OR estimate_seconds >= 0),
    completed         INTEGER NOT NULL DEFAULT 0,
    UNIQUE (book_id, stage)
);

CREATE TABLE IF NOT EXISTS time_entries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id     INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    user_name   TEXT NOT NULL,
    seconds     INTEGER NOT NULL CHECK (seconds >= 0),
    started_at  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS time_entries_task ON time_entries (task_id);

CREATE TABLE IF NOT EXISTS active_timers (
    task_id              INTEGER PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
    started_at           TEXT NOT NULL,
    accumulated_seconds  INTEGER NOT NULL DEFAULT 0,
    started_by           TEXT NOT NULL
);
";

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(1, SCHEMA_V1)];

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a failing store operation is attempted before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Store {
    conn: Connection,
    options: StoreOptions,
}

impl Store {
    /// Open (or create) the database at `path`, apply pragmas and migrate
    /// the schema to the latest version.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        configure_connection(&conn, &options)?;
        let version = migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), version, "store opened");
        Ok(Self { conn, options })
    }

    pub fn open_in_memory() -> Result<Self> {
        let options = StoreOptions::default();
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(options.busy_timeout)?;
        migrate(&mut conn)?;
        Ok(Self { conn, options })
    }

    /// Direct access to the connection, bypassing retries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a read-only operation, retrying transient failures.
    pub fn read<T, F>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let conn = &self.conn;
        retrying(self.options.retry, op, || f(conn))
    }

    /// Run `f` inside an immediate transaction. The transaction commits only
    /// if `f` succeeds; any error rolls back everything `f` wrote. Transient
    /// failures re-run the whole transaction.
    pub fn write<T, F>(&mut self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let policy = self.options.retry;
        let conn = &mut self.conn;
        retrying(policy, op, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&*tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

fn configure_connection(conn: &Connection, options: &StoreOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(())
}

/// Read `PRAGMA user_version` as the schema version.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        tracing::info!(version, "applied schema migration");
        current = *version;
    }

    Ok(current)
}

/// Busy and locked databases or I/O failures may succeed when tried again.
/// Everything else (constraints, malformed data, bad SQL) will not.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy
                | rusqlite::ErrorCode::DatabaseLocked
                | rusqlite::ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}

fn retrying<T, F>(policy: RetryPolicy, op: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt() {
            Err(Error::Database(err)) if is_transient(&err) => {
                if attempts >= max_attempts {
                    tracing::warn!(op, attempts, error = %err, "giving up on store operation");
                    return Err(Error::Storage {
                        op,
                        attempts,
                        source: err,
                    });
                }
                tracing::warn!(op, attempt = attempts, error = %err, "transient store failure, retrying");
                thread::sleep(policy.backoff);
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn busy() -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    fn sqlite_object_exists(conn: &Connection, kind: &str, name: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
            [kind, name],
            |row| row.get(0),
        )
    }

    #[test]
    fn migrate_empty_db_to_latest() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn)?, LATEST_SCHEMA_VERSION);

        for table in ["books", "tasks", "time_entries", "active_timers"] {
            assert!(sqlite_object_exists(&conn, "table", table)?, "missing {table}");
        }
        assert!(sqlite_object_exists(&conn, "index", "books_active_name")?);
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn open_sets_wal_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("booktime.sqlite"), StoreOptions::default()).unwrap();
        let conn = store.connection();

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let value = retrying(quick(3), "probe", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_retries_surface_storage_error() {
        let calls = Cell::new(0);
        let err = retrying::<(), _>(quick(2), "probe", || {
            calls.set(calls.get() + 1);
            Err(busy())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Storage { op: "probe", attempts: 2, .. }));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = retrying::<(), _>(quick(5), "probe", || {
            calls.set(calls.get() + 1);
            Err(Error::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
                None,
            )))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failed_write_rolls_back() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store
            .write("probe", |tx| {
                tx.execute(
                    "INSERT INTO books (name, created_at) VALUES ('Tides', '2024-01-01 00:00:00+00:00')",
                    [],
                )?;
                Err::<(), _>(Error::validation("probe", None, "nope"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let count: i64 = store
            .connection()
            .query_row("SELECT count(*) FROM books", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
