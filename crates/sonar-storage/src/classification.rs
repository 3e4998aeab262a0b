//! Classification repository: one label per (search, window) pair.

use std::sync::Arc;

use rusqlite::params;

use sonar_core::error::{Result, SonarError};
use sonar_core::types::Classification;

use crate::db::{map_sqlite_err, parse_timestamp, Database};

const SELECT_COLUMNS: &str = "search_id, window_id, is_positive, created, updated";

/// Repository for window classifications.
#[derive(Clone)]
pub struct ClassificationRepository {
    db: Arc<Database>,
}

impl ClassificationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the label for a window, overwriting any previous label.
    ///
    /// UPDATE-then-INSERT upsert in one transaction, so concurrent callers
    /// can never produce two rows for the same (search, window) pair.
    /// Re-setting the same label is a semantic no-op but still bumps
    /// `updated` through the table trigger.
    pub fn set(&self, search_id: i64, window_id: i64, is_positive: i64) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute(
                "UPDATE classification
                 SET is_positive = ?1
                 WHERE search_id = ?2 AND window_id = ?3",
                params![is_positive, search_id, window_id],
            )
            .map_err(|e| map_sqlite_err("update classification", e))?;

            tx.execute(
                "INSERT OR IGNORE INTO classification (search_id, window_id, is_positive)
                 VALUES (?1, ?2, ?3)",
                params![search_id, window_id, is_positive],
            )
            .map_err(|e| map_sqlite_err("insert classification", e))?;

            Ok(())
        })
    }

    /// Fetch the label for one window, or `None` if it was never set.
    pub fn get(&self, search_id: i64, window_id: i64) -> Result<Option<Classification>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM classification WHERE search_id = ?1 AND window_id = ?2",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_err("get classification prepare", e))?;

            let mut rows = stmt
                .query(params![search_id, window_id])
                .map_err(|e| map_sqlite_err("get classification", e))?;

            match rows
                .next()
                .map_err(|e| map_sqlite_err("get classification", e))?
            {
                Some(row) => Ok(Some(row_to_classification(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Fetch all classifications for a search. Unordered.
    pub fn get_all(&self, search_id: i64) -> Result<Vec<Classification>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM classification WHERE search_id = ?1",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_err("get classifications prepare", e))?;

            let mut rows = stmt
                .query(params![search_id])
                .map_err(|e| map_sqlite_err("get classifications", e))?;

            let mut classifications = Vec::new();
            while let Some(row) = rows
                .next()
                .map_err(|e| map_sqlite_err("get classifications", e))?
            {
                classifications.push(row_to_classification(row)?);
            }
            Ok(classifications)
        })
    }

    /// Remove the label for one window. No-op when absent.
    pub fn delete(&self, search_id: i64, window_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM classification WHERE search_id = ?1 AND window_id = ?2",
                params![search_id, window_id],
            )
            .map_err(|e| map_sqlite_err("delete classification", e))?;
            Ok(())
        })
    }
}

fn row_to_classification(row: &rusqlite::Row<'_>) -> Result<Classification> {
    let err = |e: rusqlite::Error| SonarError::Storage(e.to_string());

    let created: String = row.get(3).map_err(err)?;
    let updated: String = row.get(4).map_err(err)?;

    Ok(Classification {
        search_id: row.get(0).map_err(err)?,
        window_id: row.get(1).map_err(err)?,
        is_positive: row.get(2).map_err(err)?,
        created: parse_timestamp(&created)?,
        updated: parse_timestamp(&updated)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchRepository;
    use serde_json::json;

    fn make_repos() -> (i64, ClassificationRepository) {
        let db = Arc::new(Database::in_memory().unwrap());
        let search = SearchRepository::new(db.clone())
            .create(0, 1000, &json!({}))
            .unwrap();
        (search.id, ClassificationRepository::new(db))
    }

    #[test]
    fn test_set_and_get() {
        let (search_id, repo) = make_repos();

        repo.set(search_id, 5, 1).unwrap();

        let c = repo.get(search_id, 5).unwrap().unwrap();
        assert_eq!(c.search_id, search_id);
        assert_eq!(c.window_id, 5);
        assert_eq!(c.is_positive, 1);
    }

    #[test]
    fn test_set_overwrites_label() {
        let (search_id, repo) = make_repos();

        repo.set(search_id, 5, 1).unwrap();
        repo.set(search_id, 5, -1).unwrap();

        let c = repo.get(search_id, 5).unwrap().unwrap();
        assert_eq!(c.is_positive, -1);

        // Still exactly one row for the pair.
        assert_eq!(repo.get_all(search_id).unwrap().len(), 1);
    }

    #[test]
    fn test_reset_same_label_bumps_updated() {
        let (search_id, repo) = make_repos();

        repo.set(search_id, 5, 1).unwrap();
        let before = repo.get(search_id, 5).unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        repo.set(search_id, 5, 1).unwrap();
        let after = repo.get(search_id, 5).unwrap().unwrap();

        assert_eq!(after.is_positive, before.is_positive);
        assert!(after.updated > before.updated);
        assert_eq!(after.created, before.created);
    }

    #[test]
    fn test_get_absent() {
        let (search_id, repo) = make_repos();
        assert!(repo.get(search_id, 99).unwrap().is_none());
    }

    #[test]
    fn test_get_all() {
        let (search_id, repo) = make_repos();

        repo.set(search_id, 1, 1).unwrap();
        repo.set(search_id, 2, -1).unwrap();
        repo.set(search_id, 3, 0).unwrap();

        let all = repo.get_all(search_id).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_delete() {
        let (search_id, repo) = make_repos();

        repo.set(search_id, 1, 1).unwrap();
        repo.delete(search_id, 1).unwrap();
        assert!(repo.get(search_id, 1).unwrap().is_none());

        // Deleting again is a no-op.
        repo.delete(search_id, 1).unwrap();
    }

    #[test]
    fn test_unknown_search_violates_constraint() {
        let (_, repo) = make_repos();

        let result = repo.set(999, 1, 1);
        assert!(matches!(result, Err(SonarError::Constraint(_))));
    }
}
