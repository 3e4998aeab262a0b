//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use sonar_core::error::{Result, SonarError};

use crate::migrations;

/// How long a statement waits on a locked database before the engine gives
/// up and the error surfaces as [`SonarError::Busy`].
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timestamp layout used for the `created`/`updated` columns: UTC wall clock
/// with millisecond resolution. Lexicographic order equals chronological
/// order, so SQL `MAX()` over these strings is sound.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The matching SQLite expression, used in column defaults and triggers.
pub(crate) const TIMESTAMP_SQL: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// Thread-safe SQLite database wrapper.
///
/// Uses WAL mode for concurrent read/write safety. The connection is
/// wrapped in a Mutex since rusqlite Connection is not Sync; the mutex plus
/// per-operation transactions give every store operation an atomic scope.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// When `clear` is true, all tables and triggers are dropped and
    /// recreated empty before use. Otherwise the schema is ensured to exist
    /// without touching data, so this is safe to call on every start.
    pub fn new(path: &Path, clear: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| SonarError::Storage(format!("Failed to open database: {}", e)))?;

        let db = Self::from_connection(conn, clear)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SonarError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn, false)
    }

    fn from_connection(conn: Connection, clear: bool) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| SonarError::Storage(format!("Failed to set pragmas: {}", e)))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| SonarError::Storage(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.with_conn(|conn| {
            if clear {
                migrations::drop_all(conn)?;
                info!("Cleared existing tables");
            }
            migrations::run_migrations(conn)
        })?;

        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// For single-statement operations. The mutex is held for the duration
    /// of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SonarError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside an IMMEDIATE transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back on `Err`. Every
    /// multi-statement operation runs through here, which also serializes
    /// the read-then-write id allocation for classifiers and projectors.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SonarError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| map_sqlite_err("begin transaction", e))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| map_sqlite_err("commit transaction", e))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error to the matching [`SonarError`] kind: busy/locked
/// becomes the retryable `Busy`, constraint failures become `Constraint`,
/// everything else is a generic storage failure.
pub(crate) fn map_sqlite_err(context: &str, e: rusqlite::Error) -> SonarError {
    match &e {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                SonarError::Busy(format!("{}: {}", context, e))
            }
            rusqlite::ErrorCode::ConstraintViolation => {
                SonarError::Constraint(format!("{}: {}", context, e))
            }
            _ => SonarError::Storage(format!("{}: {}", context, e)),
        },
        _ => SonarError::Storage(format!("{}: {}", context, e)),
    }
}

/// Parse a `created`/`updated` column value into a UTC timestamp.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| SonarError::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}
