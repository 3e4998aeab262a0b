//! Projector repository: numbered dimensionality-reduction snapshots.
//!
//! Same id allocation as classifiers (MAX + 1 per search, starting at 0).
//! Update fields are skipped when absent or empty: a zero-length blob can
//! only be established at creation, never written through an update.

use std::sync::Arc;

use rusqlite::{params, types::ToSql};

use sonar_core::error::{Result, SonarError};
use sonar_core::types::{Projector, ProjectorUpdate};

use crate::db::{map_sqlite_err, parse_timestamp, Database};

const SELECT_COLUMNS: &str =
    "search_id, projector_id, projector, projection, classifications, settings, created, updated";

/// Repository for projector snapshots.
#[derive(Clone)]
pub struct ProjectorRepository {
    db: Arc<Database>,
}

impl ProjectorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the next projector for a search and return its id.
    ///
    /// Allocation mirrors classifiers: MAX(projector_id) + 1 inside one
    /// immediate transaction, 0 when none exist.
    pub fn create(
        &self,
        search_id: i64,
        projector: &[u8],
        projection: &[u8],
        classifications: &[u8],
        settings: &str,
    ) -> Result<i64> {
        self.db.with_tx(|tx| {
            let max: Option<i64> = tx
                .query_row(
                    "SELECT MAX(projector_id) FROM projector WHERE search_id = ?1",
                    params![search_id],
                    |row| row.get(0),
                )
                .map_err(|e| map_sqlite_err("allocate projector id", e))?;

            let projector_id = max.map_or(0, |m| m + 1);

            tx.execute(
                "INSERT INTO projector
                    (search_id, projector_id, projector, projection, classifications, settings)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    search_id,
                    projector_id,
                    projector,
                    projection,
                    classifications,
                    settings
                ],
            )
            .map_err(|e| map_sqlite_err("create projector", e))?;

            Ok(projector_id)
        })
    }

    /// Fetch one projector, or — when `projector_id` is `None` — the latest
    /// one (highest id) for the search. `None` when absent.
    pub fn get(&self, search_id: i64, projector_id: Option<i64>) -> Result<Option<Projector>> {
        self.db.with_conn(|conn| {
            let (sql, params_vec): (String, Vec<Box<dyn ToSql>>) = match projector_id {
                Some(id) => (
                    format!(
                        "SELECT {} FROM projector
                         WHERE search_id = ? AND projector_id = ?",
                        SELECT_COLUMNS
                    ),
                    vec![Box::new(search_id) as Box<dyn ToSql>, Box::new(id)],
                ),
                None => (
                    format!(
                        "SELECT {} FROM projector
                         WHERE search_id = ?
                         ORDER BY projector_id DESC
                         LIMIT 1",
                        SELECT_COLUMNS
                    ),
                    vec![Box::new(search_id) as Box<dyn ToSql>],
                ),
            };

            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_err("get projector prepare", e))?;

            let mut rows = stmt
                .query(params_refs.as_slice())
                .map_err(|e| map_sqlite_err("get projector", e))?;

            match rows.next().map_err(|e| map_sqlite_err("get projector", e))? {
                Some(row) => Ok(Some(row_to_projector(row)?)),
                None => Ok(None),
            }
        })
    }

    /// All existing projector ids for a search, descending.
    pub fn ids(&self, search_id: i64) -> Result<Vec<i64>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT projector_id FROM projector
                     WHERE search_id = ?1
                     ORDER BY projector_id DESC",
                )
                .map_err(|e| map_sqlite_err("projector ids prepare", e))?;

            let rows = stmt
                .query_map(params![search_id], |row| row.get(0))
                .map_err(|e| map_sqlite_err("projector ids", e))?;

            let mut ids = Vec::new();
            for id in rows {
                ids.push(id.map_err(|e| map_sqlite_err("projector ids", e))?);
            }
            Ok(ids)
        })
    }

    /// Apply a partial update in one transaction. Fields that are absent or
    /// empty are left untouched; an update that writes no field still
    /// touches the row so `updated` advances.
    pub fn update(
        &self,
        search_id: i64,
        projector_id: i64,
        update: &ProjectorUpdate,
    ) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(projector) = &update.projector {
            if !projector.is_empty() {
                sets.push("projector = ?");
                params_vec.push(Box::new(projector.clone()));
            }
        }
        if let Some(projection) = &update.projection {
            if !projection.is_empty() {
                sets.push("projection = ?");
                params_vec.push(Box::new(projection.clone()));
            }
        }
        if let Some(classifications) = &update.classifications {
            if !classifications.is_empty() {
                sets.push("classifications = ?");
                params_vec.push(Box::new(classifications.clone()));
            }
        }
        if let Some(settings) = &update.settings {
            if !settings.is_empty() {
                sets.push("settings = ?");
                params_vec.push(Box::new(settings.clone()));
            }
        }

        if sets.is_empty() {
            sets.push("projector_id = projector_id");
        }

        let sql = format!(
            "UPDATE projector SET {} WHERE search_id = ? AND projector_id = ?",
            sets.join(", ")
        );
        params_vec.push(Box::new(search_id));
        params_vec.push(Box::new(projector_id));

        self.db.with_tx(|tx| {
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
            tx.execute(&sql, params_refs.as_slice())
                .map_err(|e| map_sqlite_err("update projector", e))?;
            Ok(())
        })
    }

    /// Delete one projector, or all projectors of the search when
    /// `projector_id` is `None`.
    pub fn delete(&self, search_id: i64, projector_id: Option<i64>) -> Result<()> {
        self.db.with_conn(|conn| {
            match projector_id {
                Some(id) => conn
                    .execute(
                        "DELETE FROM projector WHERE search_id = ?1 AND projector_id = ?2",
                        params![search_id, id],
                    )
                    .map_err(|e| map_sqlite_err("delete projector", e))?,
                None => conn
                    .execute(
                        "DELETE FROM projector WHERE search_id = ?1",
                        params![search_id],
                    )
                    .map_err(|e| map_sqlite_err("delete projectors", e))?,
            };
            Ok(())
        })
    }
}

fn row_to_projector(row: &rusqlite::Row<'_>) -> Result<Projector> {
    let err = |e: rusqlite::Error| SonarError::Storage(e.to_string());

    let created: String = row.get(6).map_err(err)?;
    let updated: String = row.get(7).map_err(err)?;

    Ok(Projector {
        search_id: row.get(0).map_err(err)?,
        projector_id: row.get(1).map_err(err)?,
        projector: row.get(2).map_err(err)?,
        projection: row.get(3).map_err(err)?,
        classifications: row.get(4).map_err(err)?,
        settings: row.get(5).map_err(err)?,
        created: parse_timestamp(&created)?,
        updated: parse_timestamp(&updated)?,
    })
}
