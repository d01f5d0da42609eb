//! Error types for dw-migrate.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for dw-migrate operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Configuration file is present but unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for the expected shape.
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Report (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error from a state store or consistency checker.
    #[error("Database error: {0}")]
    Database(String),

    /// Requested domain is not part of the domain graph.
    #[error("Unknown domain: '{name}'. Supported domains: {}", known.join(", "))]
    UnknownDomain { name: String, known: Vec<String> },

    /// Domain graph failed validation at load time.
    #[error("Invalid domain graph: {0}")]
    InvalidGraph(String),

    /// Corpus path is not a directory.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Create an unknown-domain error listing the supported names.
    pub fn unknown_domain(name: impl Into<String>, known: impl IntoIterator<Item = String>) -> Self {
        Self::UnknownDomain {
            name: name.into(),
            known: known.into_iter().collect(),
        }
    }
}

impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for dw-migrate operations.
pub type MigrateResult<T> = Result<T, MigrateError>;
