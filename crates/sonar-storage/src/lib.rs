//! Sonar storage crate - SQLite persistence for the interactive search
//! workflow.
//!
//! Provides a WAL-mode SQLite database with migrations and one repository
//! per entity: searches, classifications, classifiers, and projectors.
//! The [`Store`] facade bundles them over a shared connection.

pub mod classification;
pub mod classifier;
pub mod db;
pub mod migrations;
pub mod projector;
pub mod search;

pub use classification::ClassificationRepository;
pub use classifier::ClassifierRepository;
pub use db::Database;
pub use projector::ProjectorRepository;
pub use search::SearchRepository;

use std::path::Path;
use std::sync::Arc;

use sonar_core::config::StoreConfig;
use sonar_core::error::Result;

/// The single entry point to persistent state.
///
/// All entity access goes through the repositories exposed here; nothing
/// else touches the backing file. Every repository operation is its own
/// transactional round trip, so a `Store` can be shared freely between
/// API handlers and background workers.
pub struct Store {
    pub searches: SearchRepository,
    pub classifications: ClassificationRepository,
    pub classifiers: ClassifierRepository,
    pub projectors: ProjectorRepository,
}

impl Store {
    /// Open (or create) the store at the given path.
    ///
    /// When `clear` is true all tables are dropped and recreated empty.
    /// Safe to call on every process start with `clear` false.
    pub fn open(path: &Path, clear: bool) -> Result<Self> {
        Ok(Self::from_db(Database::new(path, clear)?))
    }

    /// Open the store described by a [`StoreConfig`].
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        Self::open(&config.db_path, config.clear_on_start)
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_db(Database::in_memory()?))
    }

    fn from_db(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            searches: SearchRepository::new(db.clone()),
            classifications: ClassificationRepository::new(db.clone()),
            classifiers: ClassifierRepository::new(db.clone()),
            projectors: ProjectorRepository::new(db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sonar_core::types::ClassifierUpdate;

    #[test]
    fn test_full_workflow() {
        let store = Store::in_memory().unwrap();

        // A user defines a search over a target region.
        let search = store
            .searches
            .create(12000, 18000, &json!({"window_size": 1024}))
            .unwrap();

        // The user labels candidate windows.
        store.classifications.set(search.id, 3, 1).unwrap();
        store.classifications.set(search.id, 4, -1).unwrap();

        // The trainer records a classifier and fills in metrics later.
        let classifier_id = store.classifiers.create(search.id, b"predictions").unwrap();
        store
            .classifiers
            .update(
                search.id,
                classifier_id,
                &ClassifierUpdate {
                    model: Some(vec![0xAB]),
                    convergence_all: Some(0.92),
                    ..Default::default()
                },
            )
            .unwrap();

        // The projector builder records a projection snapshot.
        store
            .projectors
            .create(search.id, b"umap", b"points", b"labels", "{}")
            .unwrap();

        let hydrated = store.searches.get(search.id).unwrap().unwrap();
        assert_eq!(hydrated.classifications, 2);
        assert_eq!(hydrated.classifications_positive, 1);
        assert_eq!(hydrated.classifiers, 1);

        let latest = store.classifiers.get(search.id, None).unwrap().unwrap();
        assert_eq!(latest.convergence_all, Some(0.92));

        assert_eq!(store.searches.list().unwrap().len(), 1);
    }

    #[test]
    fn test_open_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            db_path: dir.path().join("sonar.db"),
            clear_on_start: false,
        };

        {
            let store = Store::open_with_config(&config).unwrap();
            store.searches.create(0, 1, &json!({})).unwrap();
        }

        // Reopening preserves data.
        let store = Store::open_with_config(&config).unwrap();
        assert_eq!(store.searches.list().unwrap().len(), 1);
    }

    #[test]
    fn test_open_with_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sonar.db");

        {
            let store = Store::open(&path, false).unwrap();
            store.searches.create(0, 1, &json!({})).unwrap();
        }

        let store = Store::open(&path, true).unwrap();
        assert!(store.searches.list().unwrap().is_empty());
    }
}
