//! Search repository: the root entity plus its aggregate reads.
//!
//! Reads hydrate each search with classification/classifier counts and the
//! effective activity timestamp via a single aggregating join, so callers
//! never re-derive those from the dependent tables.

use std::sync::Arc;

use rusqlite::params;

use sonar_core::error::{Result, SonarError};
use sonar_core::types::Search;

use crate::db::{map_sqlite_err, parse_timestamp, Database};

/// Shared hydration query: the search row joined against per-search
/// aggregates over classification and classifier. Projector activity is
/// intentionally not part of the aggregate.
const HYDRATE_SELECT: &str = "
    SELECT
        s.id, s.target_from, s.target_to, s.config, s.created, s.updated,
        s.name, s.description,
        c.updated, c.classifications, c.classifications_positive,
        x.updated, x.classifiers
    FROM
        search AS s
        LEFT OUTER JOIN (
            SELECT
                search_id,
                MAX(updated) AS updated,
                COUNT(*) AS classifications,
                SUM(is_positive = 1) AS classifications_positive
            FROM classification
            GROUP BY search_id
        ) AS c ON s.id = c.search_id
        LEFT OUTER JOIN (
            SELECT
                search_id,
                MAX(updated) AS updated,
                COUNT(*) AS classifiers
            FROM classifier
            GROUP BY search_id
        ) AS x ON s.id = x.search_id";

/// Repository for search entities.
#[derive(Clone)]
pub struct SearchRepository {
    db: Arc<Database>,
}

impl SearchRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a new search over `[target_from, target_to]`.
    ///
    /// The config is stored as normalized JSON (serde_json maps are
    /// key-sorted), so identical configs serialize identically. Returns the
    /// fully hydrated row.
    pub fn create(
        &self,
        target_from: i64,
        target_to: i64,
        config: &serde_json::Value,
    ) -> Result<Search> {
        let config_text = serde_json::to_string(config)?;

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO search (target_from, target_to, config) VALUES (?1, ?2, ?3)",
                params![target_from, target_to, config_text],
            )
            .map_err(|e| map_sqlite_err("create search", e))?;
            Ok(conn.last_insert_rowid())
        })?;

        self.get(id)?
            .ok_or_else(|| SonarError::Storage(format!("search {} missing after insert", id)))
    }

    /// Fetch a single hydrated search, or `None` if it does not exist.
    ///
    /// Counts are 0 and the effective timestamp falls back to the row's own
    /// `updated` when no classifications/classifiers exist yet.
    pub fn get(&self, id: i64) -> Result<Option<Search>> {
        self.db.with_conn(|conn| {
            let sql = format!("{} WHERE s.id = ?1", HYDRATE_SELECT);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_err("get search prepare", e))?;

            let mut rows = stmt
                .query(params![id])
                .map_err(|e| map_sqlite_err("get search", e))?;

            match rows.next().map_err(|e| map_sqlite_err("get search", e))? {
                Some(row) => Ok(Some(row_to_search(row)?)),
                None => Ok(None),
            }
        })
    }

    /// List every search, hydrated, ordered by most recent activity.
    ///
    /// The ordering key is the effective updated timestamp: the max of the
    /// search's own `updated` and the latest classification/classifier
    /// `updated`, with absent aggregates treated as earliest-possible.
    pub fn list(&self) -> Result<Vec<Search>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{}
                 ORDER BY
                    MAX(
                        s.updated,
                        COALESCE(c.updated, ''),
                        COALESCE(x.updated, '')
                    )
                    DESC",
                HYDRATE_SELECT
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_err("list searches prepare", e))?;

            let mut rows = stmt
                .query([])
                .map_err(|e| map_sqlite_err("list searches", e))?;

            let mut searches = Vec::new();
            while let Some(row) = rows.next().map_err(|e| map_sqlite_err("list searches", e))? {
                searches.push(row_to_search(row)?);
            }
            Ok(searches)
        })
    }

    /// Delete a search together with all of its classifications, classifiers,
    /// and projectors, in one transaction. No-op when the search is absent.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM classification WHERE search_id = ?1",
                params![id],
            )
            .map_err(|e| map_sqlite_err("delete classifications", e))?;
            tx.execute("DELETE FROM classifier WHERE search_id = ?1", params![id])
                .map_err(|e| map_sqlite_err("delete classifiers", e))?;
            tx.execute("DELETE FROM projector WHERE search_id = ?1", params![id])
                .map_err(|e| map_sqlite_err("delete projectors", e))?;
            tx.execute("DELETE FROM search WHERE id = ?1", params![id])
                .map_err(|e| map_sqlite_err("delete search", e))?;
            Ok(())
        })
    }
}

fn row_to_search(row: &rusqlite::Row<'_>) -> Result<Search> {
    let err = |e: rusqlite::Error| SonarError::Storage(e.to_string());

    let id: i64 = row.get(0).map_err(err)?;
    let target_from: i64 = row.get::<_, Option<i64>>(1).map_err(err)?.unwrap_or(0);
    let target_to: i64 = row.get::<_, Option<i64>>(2).map_err(err)?.unwrap_or(0);
    let config_text: Option<String> = row.get(3).map_err(err)?;
    let created: String = row.get(4).map_err(err)?;
    let own_updated: String = row.get(5).map_err(err)?;
    let name: Option<String> = row.get(6).map_err(err)?;
    let description: Option<String> = row.get(7).map_err(err)?;
    let classification_updated: Option<String> = row.get(8).map_err(err)?;
    let classifications: Option<i64> = row.get(9).map_err(err)?;
    let classifications_positive: Option<i64> = row.get(10).map_err(err)?;
    let classifier_updated: Option<String> = row.get(11).map_err(err)?;
    let classifiers: Option<i64> = row.get(12).map_err(err)?;

    // Effective updated: most recent across the row itself and its
    // classification/classifier aggregates. Plain string comparison is
    // correct for the fixed timestamp layout.
    let mut effective = own_updated;
    for candidate in [classification_updated, classifier_updated].into_iter().flatten() {
        if candidate > effective {
            effective = candidate;
        }
    }

    let config = match config_text {
        Some(text) => serde_json::from_str(&text)?,
        None => serde_json::Value::Null,
    };

    Ok(Search {
        id,
        target_from,
        target_to,
        config,
        name,
        description,
        created: parse_timestamp(&created)?,
        updated: parse_timestamp(&effective)?,
        classifications: classifications.unwrap_or(0) as u64,
        classifications_positive: classifications_positive.unwrap_or(0) as u64,
        classifiers: classifiers.unwrap_or(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::ClassificationRepository;
    use crate::classifier::ClassifierRepository;
    use crate::projector::ProjectorRepository;
    use serde_json::json;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_create_and_get_round_trip() {
        let repo = SearchRepository::new(make_db());

        let config = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let search = repo.create(100, 200, &config).unwrap();

        assert_eq!(search.id, 1);
        assert_eq!(search.target_from, 100);
        assert_eq!(search.target_to, 200);
        assert_eq!(search.config, config);
        assert_eq!(search.name, None);
        assert_eq!(search.description, None);
        assert_eq!(search.classifications, 0);
        assert_eq!(search.classifications_positive, 0);
        assert_eq!(search.classifiers, 0);

        let fetched = repo.get(search.id).unwrap().unwrap();
        assert_eq!(fetched, search);
    }

    #[test]
    fn test_config_stored_normalized() {
        let db = make_db();
        let repo = SearchRepository::new(db.clone());

        repo.create(0, 10, &json!({"zeta": 1, "alpha": 2})).unwrap();

        let stored: String = db
            .with_conn(|conn| {
                conn.query_row("SELECT config FROM search WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .map_err(|e| map_sqlite_err("config", e))
            })
            .unwrap();
        assert_eq!(stored, "{\"alpha\":2,\"zeta\":1}");
    }

    #[test]
    fn test_get_nonexistent() {
        let repo = SearchRepository::new(make_db());
        assert!(repo.get(42).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let repo = SearchRepository::new(make_db());
        let a = repo.create(0, 1, &json!({})).unwrap();
        let b = repo.create(0, 1, &json!({})).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_aggregate_counts() {
        let db = make_db();
        let searches = SearchRepository::new(db.clone());
        let classifications = ClassificationRepository::new(db.clone());
        let classifiers = ClassifierRepository::new(db);

        let search = searches.create(0, 1000, &json!({})).unwrap();

        classifications.set(search.id, 10, 1).unwrap();
        classifications.set(search.id, 11, 1).unwrap();
        classifications.set(search.id, 12, -1).unwrap();
        classifiers.create(search.id, b"snapshot").unwrap();

        let hydrated = searches.get(search.id).unwrap().unwrap();
        assert_eq!(hydrated.classifications, 3);
        assert_eq!(hydrated.classifications_positive, 2);
        assert_eq!(hydrated.classifiers, 1);
    }

    #[test]
    fn test_list_orders_by_activity() {
        let db = make_db();
        let searches = SearchRepository::new(db.clone());
        let classifications = ClassificationRepository::new(db);

        let a = searches.create(0, 1, &json!({})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let b = searches.create(0, 1, &json!({})).unwrap();

        // B is newer, so it leads.
        let listed = searches.list().unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);

        // Classifying A makes it the most recently active.
        std::thread::sleep(std::time::Duration::from_millis(10));
        classifications.set(a.id, 7, 1).unwrap();

        let listed = searches.list().unwrap();
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }

    #[test]
    fn test_classification_activity_updates_effective_timestamp() {
        let db = make_db();
        let searches = SearchRepository::new(db.clone());
        let classifications = ClassificationRepository::new(db);

        let search = searches.create(0, 1, &json!({})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        classifications.set(search.id, 1, 1).unwrap();

        let hydrated = searches.get(search.id).unwrap().unwrap();
        assert!(hydrated.updated > search.updated);
    }

    #[test]
    fn test_delete_cascades() {
        let db = make_db();
        let searches = SearchRepository::new(db.clone());
        let classifications = ClassificationRepository::new(db.clone());
        let classifiers = ClassifierRepository::new(db.clone());
        let projectors = ProjectorRepository::new(db.clone());

        let search = searches.create(0, 1, &json!({})).unwrap();
        classifications.set(search.id, 1, 1).unwrap();
        classifiers.create(search.id, b"snapshot").unwrap();
        projectors
            .create(search.id, b"proj", b"points", b"labels", "{}")
            .unwrap();

        searches.delete(search.id).unwrap();

        assert!(searches.get(search.id).unwrap().is_none());
        assert!(classifications.get_all(search.id).unwrap().is_empty());
        assert!(classifiers.ids(search.id).unwrap().is_empty());
        assert!(projectors.ids(search.id).unwrap().is_empty());

        // No orphaned rows remain in any dependent table.
        for table in ["classification", "classifier", "projector"] {
            let count: i64 = db
                .with_conn(|conn| {
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })
                    .map_err(|e| map_sqlite_err("count", e))
                })
                .unwrap();
            assert_eq!(count, 0, "table {} should be empty", table);
        }
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let repo = SearchRepository::new(make_db());
        repo.delete(123).unwrap();
    }
}
