use thiserror::Error;

/// Top-level error type for the Sonar system.
///
/// Absent rows are not errors: single-row lookups return `Ok(None)` so that
/// callers can tell "no classifier yet" apart from a storage failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SonarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The database was locked beyond the busy timeout. Retryable.
    #[error("Storage busy: {0}")]
    Busy(String),

    /// A uniqueness or foreign-key constraint was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for SonarError {
    fn from(err: toml::de::Error) -> Self {
        SonarError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SonarError {
    fn from(err: serde_json::Error) -> Self {
        SonarError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Sonar operations.
pub type Result<T> = std::result::Result<T, SonarError>;
