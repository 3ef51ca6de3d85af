//! Cloud client errors

use thiserror::Error;

/// Errors that can occur when talking to a cloud backend
#[derive(Debug, Error)]
pub enum CloudError {
    /// The backend rejected the call
    #[error("Cloud API error: {0}")]
    Api(String),

    /// The backend asked us to slow down
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// The call did not complete within the per-call deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource with the same identity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State snapshot could not be read or written
    #[error("State file error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    /// Transient failures worth retrying on idempotent verbs
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Throttled(_) | CloudError::Timeout(_))
    }
}
