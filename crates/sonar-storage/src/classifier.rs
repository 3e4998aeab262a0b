//! Classifier repository: numbered model snapshots per search.
//!
//! Classifier ids count up from 0 within each search (MAX + 1 at creation).
//! Deletions can leave gaps; callers must rely on `ids`, not contiguity.

use std::sync::Arc;

use rusqlite::{params, types::ToSql};

use sonar_core::error::{Result, SonarError};
use sonar_core::types::{Classifier, ClassifierProgress, ClassifierUpdate};

use crate::db::{map_sqlite_err, parse_timestamp, Database};

const SELECT_COLUMNS: &str = "search_id, classifier_id, serialized_classifications, model,
    unpredictability_all, unpredictability_labels,
    prediction_proba_change_all, prediction_proba_change_labels,
    convergence_all, convergence_labels,
    divergence_all, divergence_labels,
    created, updated";

/// Repository for classifier snapshots.
#[derive(Clone)]
pub struct ClassifierRepository {
    db: Arc<Database>,
}

impl ClassifierRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the next classifier for a search and return its id.
    ///
    /// The id is MAX(classifier_id) + 1 for the search, 0 when none exist.
    /// The read and the insert run in one immediate transaction behind the
    /// connection mutex, so concurrent creators can never allocate the same
    /// id.
    pub fn create(&self, search_id: i64, serialized_classifications: &[u8]) -> Result<i64> {
        self.db.with_tx(|tx| {
            let max: Option<i64> = tx
                .query_row(
                    "SELECT MAX(classifier_id) FROM classifier WHERE search_id = ?1",
                    params![search_id],
                    |row| row.get(0),
                )
                .map_err(|e| map_sqlite_err("allocate classifier id", e))?;

            let classifier_id = max.map_or(0, |m| m + 1);

            tx.execute(
                "INSERT INTO classifier (search_id, classifier_id, serialized_classifications)
                 VALUES (?1, ?2, ?3)",
                params![search_id, classifier_id, serialized_classifications],
            )
            .map_err(|e| map_sqlite_err("create classifier", e))?;

            Ok(classifier_id)
        })
    }

    /// Fetch one classifier, or — when `classifier_id` is `None` — the
    /// latest one (highest id) for the search. `None` when absent.
    pub fn get(&self, search_id: i64, classifier_id: Option<i64>) -> Result<Option<Classifier>> {
        self.db.with_conn(|conn| {
            let (sql, params_vec): (String, Vec<Box<dyn ToSql>>) = match classifier_id {
                Some(id) => (
                    format!(
                        "SELECT {} FROM classifier
                         WHERE search_id = ? AND classifier_id = ?",
                        SELECT_COLUMNS
                    ),
                    vec![
                        Box::new(search_id) as Box<dyn ToSql>,
                        Box::new(id),
                    ],
                ),
                None => (
                    format!(
                        "SELECT {} FROM classifier
                         WHERE search_id = ?
                         ORDER BY classifier_id DESC
                         LIMIT 1",
                        SELECT_COLUMNS
                    ),
                    vec![Box::new(search_id) as Box<dyn ToSql>],
                ),
            };

            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_err("get classifier prepare", e))?;

            let mut rows = stmt
                .query(params_refs.as_slice())
                .map_err(|e| map_sqlite_err("get classifier", e))?;

            match rows.next().map_err(|e| map_sqlite_err("get classifier", e))? {
                Some(row) => Ok(Some(row_to_classifier(row)?)),
                None => Ok(None),
            }
        })
    }

    /// All existing classifier ids for a search, descending.
    pub fn ids(&self, search_id: i64) -> Result<Vec<i64>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT classifier_id FROM classifier
                     WHERE search_id = ?1
                     ORDER BY classifier_id DESC",
                )
                .map_err(|e| map_sqlite_err("classifier ids prepare", e))?;

            let rows = stmt
                .query_map(params![search_id], |row| row.get(0))
                .map_err(|e| map_sqlite_err("classifier ids", e))?;

            let mut ids = Vec::new();
            for id in rows {
                ids.push(id.map_err(|e| map_sqlite_err("classifier ids", e))?);
            }
            Ok(ids)
        })
    }

    /// Apply a partial update: only supplied fields are written, in one
    /// transaction. An empty update writes no field but still touches the
    /// row, so `updated` advances either way.
    pub fn update(
        &self,
        search_id: i64,
        classifier_id: i64,
        update: &ClassifierUpdate,
    ) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(model) = &update.model {
            sets.push("model = ?");
            params_vec.push(Box::new(model.clone()));
        }
        let metrics: [(&str, Option<f64>); 8] = [
            ("unpredictability_all = ?", update.unpredictability_all),
            ("unpredictability_labels = ?", update.unpredictability_labels),
            (
                "prediction_proba_change_all = ?",
                update.prediction_proba_change_all,
            ),
            (
                "prediction_proba_change_labels = ?",
                update.prediction_proba_change_labels,
            ),
            ("convergence_all = ?", update.convergence_all),
            ("convergence_labels = ?", update.convergence_labels),
            ("divergence_all = ?", update.divergence_all),
            ("divergence_labels = ?", update.divergence_labels),
        ];
        for (clause, value) in metrics {
            if let Some(value) = value {
                sets.push(clause);
                params_vec.push(Box::new(value));
            }
        }

        // No fields supplied: issue a self-assignment so the updated
        // trigger still fires.
        if sets.is_empty() {
            sets.push("classifier_id = classifier_id");
        }

        let sql = format!(
            "UPDATE classifier SET {} WHERE search_id = ? AND classifier_id = ?",
            sets.join(", ")
        );
        params_vec.push(Box::new(search_id));
        params_vec.push(Box::new(classifier_id));

        self.db.with_tx(|tx| {
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
            tx.execute(&sql, params_refs.as_slice())
                .map_err(|e| map_sqlite_err("update classifier", e))?;
            Ok(())
        })
    }

    /// Delete one classifier, or all classifiers of the search when
    /// `classifier_id` is `None`.
    pub fn delete(&self, search_id: i64, classifier_id: Option<i64>) -> Result<()> {
        self.db.with_conn(|conn| {
            match classifier_id {
                Some(id) => conn
                    .execute(
                        "DELETE FROM classifier WHERE search_id = ?1 AND classifier_id = ?2",
                        params![search_id, id],
                    )
                    .map_err(|e| map_sqlite_err("delete classifier", e))?,
                None => conn
                    .execute(
                        "DELETE FROM classifier WHERE search_id = ?1",
                        params![search_id],
                    )
                    .map_err(|e| map_sqlite_err("delete classifiers", e))?,
            };
            Ok(())
        })
    }

    /// Convergence metrics for every classifier of a search, ascending by
    /// id, for charting training progress across iterations.
    pub fn progress(&self, search_id: i64) -> Result<Vec<ClassifierProgress>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT
                        classifier_id,
                        unpredictability_all, unpredictability_labels,
                        prediction_proba_change_all, prediction_proba_change_labels,
                        convergence_all, convergence_labels,
                        divergence_all, divergence_labels,
                        serialized_classifications
                     FROM classifier
                     WHERE search_id = ?1
                     ORDER BY classifier_id ASC",
                )
                .map_err(|e| map_sqlite_err("progress prepare", e))?;

            let rows = stmt
                .query_map(params![search_id], |row| {
                    Ok(ClassifierProgress {
                        classifier_id: row.get(0)?,
                        unpredictability_all: row.get(1)?,
                        unpredictability_labels: row.get(2)?,
                        prediction_proba_change_all: row.get(3)?,
                        prediction_proba_change_labels: row.get(4)?,
                        convergence_all: row.get(5)?,
                        convergence_labels: row.get(6)?,
                        divergence_all: row.get(7)?,
                        divergence_labels: row.get(8)?,
                        serialized_classifications: row.get(9)?,
                    })
                })
                .map_err(|e| map_sqlite_err("progress", e))?;

            let mut progress = Vec::new();
            for row in rows {
                progress.push(row.map_err(|e| map_sqlite_err("progress", e))?);
            }
            Ok(progress)
        })
    }
}

fn row_to_classifier(row: &rusqlite::Row<'_>) -> Result<Classifier> {
    let err = |e: rusqlite::Error| SonarError::Storage(e.to_string());

    let created: String = row.get(12).map_err(err)?;
    let updated: String = row.get(13).map_err(err)?;

    Ok(Classifier {
        search_id: row.get(0).map_err(err)?,
        classifier_id: row.get(1).map_err(err)?,
        serialized_classifications: row.get(2).map_err(err)?,
        model: row.get(3).map_err(err)?,
        unpredictability_all: row.get(4).map_err(err)?,
        unpredictability_labels: row.get(5).map_err(err)?,
        prediction_proba_change_all: row.get(6).map_err(err)?,
        prediction_proba_change_labels: row.get(7).map_err(err)?,
        convergence_all: row.get(8).map_err(err)?,
        convergence_labels: row.get(9).map_err(err)?,
        divergence_all: row.get(10).map_err(err)?,
        divergence_labels: row.get(11).map_err(err)?,
        created: parse_timestamp(&created)?,
        updated: parse_timestamp(&updated)?,
    })
}
