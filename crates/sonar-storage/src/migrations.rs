//! Database schema migrations.
//!
//! Applies the initial schema: the search, classification, classifier, and
//! projector tables, one updated-timestamp trigger per table, and the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use sonar_core::error::Result;

use crate::db::{map_sqlite_err, TIMESTAMP_SQL};

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT ({TIMESTAMP_SQL})
        );"
    ))
    .map_err(|e| map_sqlite_err("create migrations table", e))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("query migration version", e))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Drop all tables and triggers, including the migration bookkeeping.
///
/// Used by the `clear` open mode. Idempotent: every statement tolerates the
/// object being absent already.
pub fn drop_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TRIGGER IF EXISTS search_updated;
         DROP TRIGGER IF EXISTS classification_updated;
         DROP TRIGGER IF EXISTS classifier_updated;
         DROP TRIGGER IF EXISTS projector_updated;
         DROP TABLE IF EXISTS classification;
         DROP TABLE IF EXISTS classifier;
         DROP TABLE IF EXISTS projector;
         DROP TABLE IF EXISTS search;
         DROP TABLE IF EXISTS schema_migrations;",
    )
    .map_err(|e| map_sqlite_err("drop tables", e))
}

/// Version 1: Initial schema.
///
/// Timestamps are TEXT in UTC with millisecond resolution. The AFTER UPDATE
/// triggers keep `updated` current on every row mutation, including partial
/// single-column updates, without the repositories setting it explicitly.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "
        -- Root entity: a user-defined search over a target range.
        CREATE TABLE IF NOT EXISTS search (
            id          INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            target_from INTEGER,
            target_to   INTEGER,
            config      TEXT,
            created     TEXT NOT NULL DEFAULT ({ts}),
            updated     TEXT NOT NULL DEFAULT ({ts}),
            name        TEXT,
            description TEXT
        );

        CREATE TRIGGER IF NOT EXISTS search_updated
            AFTER UPDATE ON search FOR EACH ROW
            BEGIN
                UPDATE search
                SET updated = {ts}
                WHERE id = old.id;
            END;

        -- One label per (search, window) pair.
        CREATE TABLE IF NOT EXISTS classification (
            search_id   INTEGER NOT NULL,
            window_id   INTEGER NOT NULL,
            is_positive INTEGER,
            created     TEXT NOT NULL DEFAULT ({ts}),
            updated     TEXT NOT NULL DEFAULT ({ts}),
            FOREIGN KEY (search_id) REFERENCES search(id),
            PRIMARY KEY (search_id, window_id)
        );

        CREATE TRIGGER IF NOT EXISTS classification_updated
            AFTER UPDATE ON classification FOR EACH ROW
            BEGIN
                UPDATE classification
                SET updated = {ts}
                WHERE
                    search_id = old.search_id
                    AND window_id = old.window_id;
            END;

        -- Numbered model snapshots per search, ids counting up from 0.
        CREATE TABLE IF NOT EXISTS classifier (
            search_id                      INTEGER NOT NULL,
            classifier_id                  INTEGER NOT NULL,
            serialized_classifications     BLOB,
            model                          BLOB,
            unpredictability_all           REAL,
            unpredictability_labels        REAL,
            prediction_proba_change_all    REAL,
            prediction_proba_change_labels REAL,
            convergence_all                REAL,
            convergence_labels             REAL,
            divergence_all                 REAL,
            divergence_labels              REAL,
            created                        TEXT NOT NULL DEFAULT ({ts}),
            updated                        TEXT NOT NULL DEFAULT ({ts}),
            FOREIGN KEY (search_id) REFERENCES search(id),
            PRIMARY KEY (search_id, classifier_id)
        );

        CREATE TRIGGER IF NOT EXISTS classifier_updated
            AFTER UPDATE ON classifier FOR EACH ROW
            BEGIN
                UPDATE classifier
                SET updated = {ts}
                WHERE
                    search_id = old.search_id
                    AND classifier_id = old.classifier_id;
            END;

        -- Numbered dimensionality-reduction snapshots, same id scheme.
        CREATE TABLE IF NOT EXISTS projector (
            search_id       INTEGER NOT NULL,
            projector_id    INTEGER NOT NULL,
            projector       BLOB,
            projection      BLOB,
            classifications BLOB,
            settings        TEXT,
            created         TEXT NOT NULL DEFAULT ({ts}),
            updated         TEXT NOT NULL DEFAULT ({ts}),
            FOREIGN KEY (search_id) REFERENCES search(id),
            PRIMARY KEY (search_id, projector_id)
        );

        CREATE TRIGGER IF NOT EXISTS projector_updated
            AFTER UPDATE ON projector FOR EACH ROW
            BEGIN
                UPDATE projector
                SET updated = {ts}
                WHERE
                    search_id = old.search_id
                    AND projector_id = old.projector_id;
            END;

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
        ts = TIMESTAMP_SQL
    ))
    .map_err(|e| map_sqlite_err("apply migration v1", e))
}
