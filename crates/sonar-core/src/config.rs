use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Configuration for opening the store.
///
/// Loaded from a TOML file or built directly by the embedding process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file. Created on first open.
    pub db_path: PathBuf,
    /// Drop and recreate all tables on open. Destroys existing data.
    pub clear_on_start: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("sonar.db"),
            clear_on_start: false,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.db_path, PathBuf::from("sonar.db"));
        assert!(!config.clear_on_start);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "db_path = \"/tmp/searches.db\"").unwrap();
        writeln!(file, "clear_on_start = true").unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/searches.db"));
        assert!(config.clear_on_start);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = StoreConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.db_path, PathBuf::from("sonar.db"));
    }
}
