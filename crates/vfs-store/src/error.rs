//! Store errors

use thiserror::Error;

/// Errors that can occur when reading or writing stored state
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Store URI could not be mapped to a backend
    #[error("Unsupported store location: {0}")]
    UnsupportedLocation(String),

    /// Stored document could not be decoded
    #[error("Malformed document at {path}: {message}")]
    Malformed {
        /// Path of the document
        path: String,
        /// Decoder message
        message: String,
    },

    /// Keyset is structurally invalid (for example a missing primary)
    #[error("Keyset {name}: {message}")]
    Keyset {
        /// Keyset name
        name: String,
        /// What is wrong
        message: String,
    },

    /// YAML encoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
